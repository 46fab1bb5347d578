//! Vote Ledger: one vote per voter per poll.
//!
//! Uniqueness is enforced by the `(poll_id, voter_id)` unique index, not by a prior
//! lookup. Two concurrent casts from the same voter both reach the insert; the store
//! accepts one and rejects the other, which surfaces as `AlreadyVoted`. Counts are always
//! derived from vote rows.

use crate::error::PollError;
use crate::identity::Identity;
use crate::orm::{poll_options, polls, votes};
use crate::polls::map_unique_violation;
use crate::rate_limit::{RateAction, RateGuard};
use crate::visibility;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{entity::*, query::*, DatabaseConnection};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Whether a voter has voted on a poll, and for what
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct VoterStatus {
    pub has_voted: bool,
    pub option_id: Option<i32>,
}

#[derive(Clone)]
pub struct VoteLedger {
    db: DatabaseConnection,
    guard: Arc<RateGuard>,
}

impl VoteLedger {
    pub fn new(db: DatabaseConnection, guard: Arc<RateGuard>) -> Self {
        Self { db, guard }
    }

    /// Record the caller's vote for `option_id` on `poll_id`.
    pub async fn cast(
        &self,
        poll_id: i32,
        option_id: i32,
        voter: &Identity,
    ) -> Result<votes::Model, PollError> {
        let poll = polls::Entity::find_by_id(poll_id)
            .one(&self.db)
            .await?
            .ok_or(PollError::NotFound(poll_id))?;

        visibility::enforce(&poll, voter)?;
        let voter_id = voter.require_login(Some(poll_id))?;

        if !poll.is_active {
            return Err(PollError::PollInactive(poll_id));
        }

        poll_options::Entity::find_by_id(option_id)
            .filter(poll_options::Column::PollId.eq(poll_id))
            .one(&self.db)
            .await?
            .ok_or(PollError::OptionNotFound { poll_id, option_id })?;

        // Refunded on drop unless the vote is recorded, including when a deadline abandons
        // the insert.
        let reservation = self.guard.reserve(voter_id, RateAction::Vote)?;

        let vote = votes::ActiveModel {
            poll_id: Set(poll_id),
            option_id: Set(option_id),
            voter_id: Set(voter_id),
            created_at: Set(Utc::now().naive_utc()),
            ..Default::default()
        }
        .insert(&self.db)
        .await
        .map_err(|e| {
            let e = map_unique_violation(e, PollError::AlreadyVoted(poll_id));
            if matches!(e, PollError::AlreadyVoted(_)) {
                log::debug!("User {} already voted on poll {}", voter_id, poll_id);
            }
            e
        })?;
        reservation.commit();

        log::info!(
            "User {} voted for option {} on poll {}",
            voter_id,
            option_id,
            poll_id
        );
        Ok(vote)
    }

    /// Committed vote count per option. Options without votes are absent.
    pub async fn count_by_option(&self, poll_id: i32) -> Result<HashMap<i32, u64>, PollError> {
        let rows: Vec<(i32, i64)> = votes::Entity::find()
            .select_only()
            .column(votes::Column::OptionId)
            .column_as(Expr::col(votes::Column::Id).count(), "vote_count")
            .filter(votes::Column::PollId.eq(poll_id))
            .group_by(votes::Column::OptionId)
            .into_tuple()
            .all(&self.db)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(option_id, count)| (option_id, count.max(0) as u64))
            .collect())
    }

    /// Single lookup by `(poll_id, voter_id)`. Anonymous callers have never voted.
    pub async fn voter_status(&self, poll_id: i32, voter: &Identity) -> Result<VoterStatus, PollError> {
        let Some(voter_id) = voter.user_id() else {
            return Ok(VoterStatus::default());
        };

        let vote = votes::Entity::find()
            .filter(votes::Column::PollId.eq(poll_id))
            .filter(votes::Column::VoterId.eq(voter_id))
            .one(&self.db)
            .await?;

        Ok(VoterStatus {
            has_voted: vote.is_some(),
            option_id: vote.map(|v| v.option_id),
        })
    }
}
