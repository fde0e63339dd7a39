//! Bounded exponential backoff for optimistic-concurrency conflicts

use std::time::Duration;

use crate::constants::{
    DEFAULT_CONFLICT_RETRY_ATTEMPTS, DEFAULT_CONFLICT_RETRY_FACTOR,
    DEFAULT_CONFLICT_RETRY_INITIAL_MS, DEFAULT_CONFLICT_RETRY_MAX_MS,
};

/// How often, and how patiently, a conflicting write is retried.
///
/// `attempts` counts every fetch-compare-write cycle, the first one included.
/// The pause before retry `n` (starting at 1) is `initial_delay * factor^(n-1)`,
/// capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_CONFLICT_RETRY_ATTEMPTS,
            initial_delay: Duration::from_millis(DEFAULT_CONFLICT_RETRY_INITIAL_MS),
            factor: DEFAULT_CONFLICT_RETRY_FACTOR,
            max_delay: Duration::from_millis(DEFAULT_CONFLICT_RETRY_MAX_MS),
        }
    }
}

impl RetryPolicy {
    /// Retry without pausing
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            initial_delay: Duration::ZERO,
            factor: 1,
            max_delay: Duration::ZERO,
        }
    }

    /// Pause before the next cycle, or `None` once `attempt` used up the budget
    pub fn next_retry(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.attempts).then(|| self.delay_for(attempt))
    }

    /// Pause before the given retry (1 for the first retry)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1);
        let multiplier = self.factor.checked_pow(exponent).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}
