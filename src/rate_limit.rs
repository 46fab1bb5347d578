/// Rate Guard: per-user quotas on mutating poll operations.
///
/// Implements sliding window rate limiting using in-memory storage (DashMap).
/// This is suitable for single-instance deployments. For multi-instance
/// deployments, the counters would need a shared backing store.
///
/// The check and the consumption of a quota unit happen under the DashMap
/// shard lock for that key, so two concurrent requests can never both observe
/// "under quota" for the last remaining unit.
///
/// # Example Usage
///
/// ```rust,ignore
/// use crate::rate_limit::{RateAction, RATE_GUARD};
///
/// RATE_GUARD.check_and_consume(user_id, RateAction::Vote)?;
/// ```
use crate::error::PollError;
use arc_swap::ArcSwap;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Global rate guard instance used by the server
pub static RATE_GUARD: Lazy<Arc<RateGuard>> = Lazy::new(|| Arc::new(RateGuard::new()));

/// Actions with a time-windowed quota
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateAction {
    PollCreation,
    PollUpdate,
    Vote,
    /// Total polls a user may own at once. Not windowed.
    PollsOwned,
}

impl RateAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateAction::PollCreation => "poll_creation",
            RateAction::PollUpdate => "poll_update",
            RateAction::Vote => "vote",
            RateAction::PollsOwned => "polls_owned",
        }
    }
}

impl fmt::Display for RateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rate guard limits
#[derive(Debug, Clone, PartialEq)]
pub struct RateGuardConfig {
    pub poll_creation_max: usize,
    pub poll_creation_window: Duration,
    pub poll_update_max: usize,
    pub poll_update_window: Duration,
    pub vote_max: usize,
    pub vote_window: Duration,
    /// Polls a single user may own at any time
    pub max_polls_owned: u64,
}

impl Default for RateGuardConfig {
    fn default() -> Self {
        Self {
            poll_creation_max: 5,
            poll_creation_window: Duration::from_secs(3600), // 1 hour
            poll_update_max: 10,
            poll_update_window: Duration::from_secs(3600), // 1 hour
            vote_max: 50,
            vote_window: Duration::from_secs(86400), // 1 day
            max_polls_owned: 50,
        }
    }
}

impl RateGuardConfig {
    /// Build limits from the `[rate_limit]` section of the application config
    pub fn from_app_config(config: &crate::app_config::RateLimitConfig) -> Self {
        Self {
            poll_creation_max: config.poll_creation_max as usize,
            poll_creation_window: Duration::from_secs(config.poll_creation_window_seconds),
            poll_update_max: config.poll_update_max as usize,
            poll_update_window: Duration::from_secs(config.poll_update_window_seconds),
            vote_max: config.vote_max as usize,
            vote_window: Duration::from_secs(config.vote_window_seconds),
            max_polls_owned: config.max_polls_owned,
        }
    }

    /// Limit and window for a windowed action
    fn limit_for(&self, action: RateAction) -> Option<(usize, Duration)> {
        match action {
            RateAction::PollCreation => Some((self.poll_creation_max, self.poll_creation_window)),
            RateAction::PollUpdate => Some((self.poll_update_max, self.poll_update_window)),
            RateAction::Vote => Some((self.vote_max, self.vote_window)),
            RateAction::PollsOwned => None,
        }
    }

    fn longest_window(&self) -> Duration {
        self.poll_creation_window
            .max(self.poll_update_window)
            .max(self.vote_window)
    }
}

/// Error returned when a windowed limit is exceeded
#[derive(Debug, Clone)]
pub struct RateLimitError {
    /// Number of seconds until the oldest counted request leaves the window
    pub retry_after_seconds: u64,
}

/// Rate guard using in-memory storage
pub struct RateGuard {
    /// Map of (action, user_id) -> request timestamps
    requests: DashMap<(RateAction, i32), Vec<Instant>>,
    config: ArcSwap<RateGuardConfig>,
}

impl RateGuard {
    /// Create a rate guard with default limits
    pub fn new() -> Self {
        Self::with_config(RateGuardConfig::default())
    }

    pub fn with_config(config: RateGuardConfig) -> Self {
        Self {
            requests: DashMap::new(),
            config: ArcSwap::from_pointee(config),
        }
    }

    /// Replace the limits. Already recorded requests keep counting against the new limits.
    pub fn reload(&self, config: RateGuardConfig) {
        self.config.store(Arc::new(config));
        log::info!("Rate guard configuration reloaded");
    }

    /// Replace the limits only if they differ from the current ones. Returns whether they did.
    pub fn apply(&self, config: RateGuardConfig) -> bool {
        if *self.config.load_full() == config {
            return false;
        }
        self.reload(config);
        true
    }

    /// Get the current limits
    pub fn config(&self) -> Arc<RateGuardConfig> {
        self.config.load_full()
    }

    /// Check the quota for `action` and consume one unit if allowed.
    pub fn check_and_consume(&self, user_id: i32, action: RateAction) -> Result<(), PollError> {
        let Some((max_requests, window)) = self.config.load().limit_for(action) else {
            return Ok(());
        };

        self.check_rate_limit(action, user_id, max_requests, window)
            .map_err(|e| {
                log::debug!(
                    "Rate guard denied {} for user {} (retry in {}s)",
                    action,
                    user_id,
                    e.retry_after_seconds
                );
                PollError::QuotaExceeded {
                    action,
                    retry_after_seconds: Some(e.retry_after_seconds),
                }
            })
    }

    /// Consume one unit like [`RateGuard::check_and_consume`], returning a reservation that
    /// gives the unit back when dropped without [`QuotaReservation::commit`].
    ///
    /// A guarded operation that fails, or whose future is dropped at a deadline, therefore
    /// never keeps the unit.
    pub fn reserve(&self, user_id: i32, action: RateAction) -> Result<QuotaReservation<'_>, PollError> {
        self.check_and_consume(user_id, action)?;
        Ok(QuotaReservation {
            guard: self,
            user_id,
            action,
            committed: false,
        })
    }

    /// Check the ownership cap given how many polls the user owns right now.
    pub fn check_ownership(&self, user_id: i32, owned: u64) -> Result<(), PollError> {
        let max = self.config.load().max_polls_owned;
        if owned >= max {
            log::debug!("User {} owns {} polls, cap is {}", user_id, owned, max);
            return Err(PollError::QuotaExceeded {
                action: RateAction::PollsOwned,
                retry_after_seconds: None,
            });
        }
        Ok(())
    }

    /// Check if a request should be rate limited, recording it when allowed
    ///
    /// # Returns
    /// * `Ok(())` if the request is allowed
    /// * `Err(RateLimitError)` if the rate limit is exceeded
    pub fn check_rate_limit(
        &self,
        action: RateAction,
        user_id: i32,
        max_requests: usize,
        window: Duration,
    ) -> Result<(), RateLimitError> {
        let now = Instant::now();

        // The entry guard holds the shard lock until the end of this function.
        let mut entry = self.requests.entry((action, user_id)).or_default();

        // Remove requests outside the time window (sliding window)
        entry.retain(|&timestamp| now.duration_since(timestamp) < window);

        if entry.len() >= max_requests {
            let retry_after = match entry.first() {
                Some(&oldest) => window.saturating_sub(now.duration_since(oldest)),
                None => window,
            };

            return Err(RateLimitError {
                retry_after_seconds: retry_after.as_secs() + 1, // Round up
            });
        }

        entry.push(now);

        Ok(())
    }

    /// Return the most recently consumed unit for `action`.
    ///
    /// Used when the guarded operation turned out not to happen, e.g. a duplicate vote
    /// rejected by the ledger.
    pub fn refund(&self, user_id: i32, action: RateAction) {
        if let Some(mut entry) = self.requests.get_mut(&(action, user_id)) {
            entry.pop();
        }
    }

    /// Get the current request count for a specific action/user within the action's window
    pub fn get_request_count(&self, user_id: i32, action: RateAction) -> u32 {
        let Some((_, window)) = self.config.load().limit_for(action) else {
            return 0;
        };
        let now = Instant::now();

        if let Some(entry) = self.requests.get(&(action, user_id)) {
            entry
                .iter()
                .filter(|&&timestamp| now.duration_since(timestamp) < window)
                .count() as u32
        } else {
            0
        }
    }

    /// Clean up expired timestamps and drop idle keys to prevent memory leaks
    ///
    /// This should be called periodically (e.g., every 5 minutes).
    pub fn cleanup_old_entries(&self) {
        let window = self.config.load().longest_window();
        let now = Instant::now();

        self.requests.retain(|_, timestamps| {
            timestamps.retain(|&timestamp| now.duration_since(timestamp) < window);
            !timestamps.is_empty()
        });
    }

    /// Get the number of tracked keys (for monitoring/debugging)
    pub fn tracked_keys_count(&self) -> usize {
        self.requests.len()
    }
}

/// A consumed quota unit that is refunded on drop unless committed
#[must_use = "dropping a reservation refunds it"]
pub struct QuotaReservation<'a> {
    guard: &'a RateGuard,
    user_id: i32,
    action: RateAction,
    committed: bool,
}

impl QuotaReservation<'_> {
    /// Keep the unit: the guarded operation took effect.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for QuotaReservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            log::debug!(
                "Refunding {} unit for user {}",
                self.action,
                self.user_id
            );
            self.guard.refund(self.user_id, self.action);
        }
    }
}

impl Default for RateGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Load the global guard's limits from the application config (call at startup)
pub fn init_rate_limits(config: &crate::app_config::AppConfig) {
    RATE_GUARD.reload(RateGuardConfig::from_app_config(&config.rate_limit));
}

/// Re-read the config file and apply any rate limit changes to the global guard
pub fn refresh_rate_limits() -> Result<bool, config::ConfigError> {
    crate::app_config::AppConfig::reload()?;
    let config = crate::app_config::get_config();
    Ok(RATE_GUARD.apply(RateGuardConfig::from_app_config(&config.rate_limit)))
}
