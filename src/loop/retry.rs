//! Retry policy for reasoning failures.
//!
//! Timeouts and provider errors are retried with exponential backoff up
//! to a small fixed count, then escalate to manual review. Parse
//! failures have their own policy
//! ([`ParseFailurePolicy`](crate::config::ParseFailurePolicy)) and do
//! not consume backoff retries.

use std::time::Duration;

/// Base backoff delay in milliseconds for retry attempts.
pub const RETRY_BACKOFF_BASE_MS: u64 = 2000;

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Multiplier for exponential backoff.
pub const BACKOFF_MULTIPLIER: u64 = 2;

/// Retry settings applied to reasoning calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    /// Base delay before the first retry.
    pub base: Duration,
    /// Cap applied to the exponential delay.
    pub max: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base: Duration::from_millis(RETRY_BACKOFF_BASE_MS),
            max: Duration::from_millis(MAX_BACKOFF_MS),
        }
    }
}

impl RetryConfig {
    /// Config with the given retry count and default delays.
    #[must_use]
    pub fn with_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Delay before retry `attempt` (1-indexed), capped at `max`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let multiplier = BACKOFF_MULTIPLIER.saturating_pow(exponent);
        let millis = (self.base.as_millis() as u64).saturating_mul(multiplier);
        Duration::from_millis(millis.min(self.max.as_millis() as u64))
    }
}
