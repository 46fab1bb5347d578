//! Results Aggregator: a poll with live vote counts, percentages and the caller's status.

use crate::error::PollError;
use crate::identity::Identity;
use crate::polls::{PollStore, PollWithOptions};
use crate::votes::{VoteLedger, VoterStatus};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OptionResult {
    pub id: i32,
    pub text: String,
    pub vote_count: u64,
    pub percentage: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PollView {
    pub id: i32,
    pub title: String,
    pub description: Option<String>,
    pub owner_id: i32,
    pub is_public: bool,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub options: Vec<OptionResult>,
    pub total_votes: u64,
    pub user_has_voted: bool,
    pub user_vote_option_id: Option<i32>,
}

/// Share of `total` as a percentage rounded to one decimal place.
///
/// Each option is rounded on its own, so a poll's percentages may sum to slightly more
/// or less than 100.
pub fn percentage(count: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (count as f64 / total as f64 * 1000.0).round() / 10.0
}

/// Builds the view from already-fetched parts.
pub fn build_view(
    poll: PollWithOptions,
    counts: &HashMap<i32, u64>,
    status: VoterStatus,
) -> PollView {
    let total_votes: u64 = poll
        .options
        .iter()
        .map(|o| counts.get(&o.id).copied().unwrap_or(0))
        .sum();

    let options = poll
        .options
        .into_iter()
        .map(|option| {
            let vote_count = counts.get(&option.id).copied().unwrap_or(0);
            OptionResult {
                id: option.id,
                text: option.text,
                vote_count,
                percentage: percentage(vote_count, total_votes),
            }
        })
        .collect();

    let poll = poll.poll;
    PollView {
        id: poll.id,
        title: poll.title,
        description: poll.description,
        owner_id: poll.owner_id,
        is_public: poll.is_public,
        is_active: poll.is_active,
        created_at: poll.created_at,
        options,
        total_votes,
        user_has_voted: status.has_voted,
        user_vote_option_id: status.option_id,
    }
}

#[derive(Clone)]
pub struct ResultsAggregator {
    store: PollStore,
    ledger: VoteLedger,
}

impl ResultsAggregator {
    pub fn new(store: PollStore, ledger: VoteLedger) -> Self {
        Self { store, ledger }
    }

    /// Poll view for `caller`. Visibility is checked before any options or votes are read.
    pub async fn assemble(&self, poll_id: i32, caller: &Identity) -> Result<PollView, PollError> {
        let poll = self.store.get_for(poll_id, caller).await?;
        let counts = self.ledger.count_by_option(poll_id).await?;
        let status = self.ledger.voter_status(poll_id, caller).await?;

        Ok(build_view(poll, &counts, status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orm::{poll_options, polls};

    fn poll_with(options: &[(i32, &str)]) -> PollWithOptions {
        PollWithOptions {
            poll: polls::Model {
                id: 1,
                owner_id: 10,
                title: "Lunch".to_string(),
                description: None,
                is_public: true,
                is_active: true,
                created_at: chrono::Utc::now().naive_utc(),
            },
            options: options
                .iter()
                .map(|&(id, text)| poll_options::Model {
                    id,
                    poll_id: 1,
                    text: text.to_string(),
                    normalized_text: text.to_lowercase(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_percentages_three_to_one() {
        let counts = HashMap::from([(1, 3), (2, 1)]);
        let view = build_view(poll_with(&[(1, "A"), (2, "B")]), &counts, VoterStatus::default());

        assert_eq!(view.total_votes, 4);
        assert_eq!(view.options[0].percentage, 75.0);
        assert_eq!(view.options[1].percentage, 25.0);
    }

    #[test]
    fn test_no_votes_is_all_zero() {
        let view = build_view(
            poll_with(&[(1, "A"), (2, "B"), (3, "C")]),
            &HashMap::new(),
            VoterStatus::default(),
        );

        assert_eq!(view.total_votes, 0);
        assert!(view.options.iter().all(|o| o.percentage == 0.0 && o.vote_count == 0));
    }

    #[test]
    fn test_rounding_is_per_option() {
        assert_eq!(percentage(1, 3), 33.3);
        assert_eq!(percentage(2, 3), 66.7);
        assert_eq!(percentage(1, 6), 16.7);

        // Three equal thirds sum to 99.9, which is accepted.
        let sum: f64 = (0..3).map(|_| percentage(1, 3)).sum();
        assert!((sum - 99.9).abs() < 1e-9);
    }

    #[test]
    fn test_voter_status_is_attached() {
        let counts = HashMap::from([(2, 1)]);
        let status = VoterStatus {
            has_voted: true,
            option_id: Some(2),
        };
        let view = build_view(poll_with(&[(1, "A"), (2, "B")]), &counts, status);

        assert!(view.user_has_voted);
        assert_eq!(view.user_vote_option_id, Some(2));
        assert_eq!(view.options[1].percentage, 100.0);
    }
}
