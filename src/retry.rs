//! Retry policy and cancellable backoff.
//!
//! Retries are consumer-driven: the engine never retries on its own. Each
//! accepted `retry()` waits [`RetryPolicy::delay`] and then repeats the load
//! that last failed. The policy only answers two questions: how long to wait
//! and whether another attempt is allowed.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Exponential backoff without jitter, capped by a retry ceiling.
///
/// ```rust
/// # use huginn::RetryPolicy;
/// # use std::time::Duration;
/// let policy = RetryPolicy::new()
///     .max_retries(5)
///     .retry_delay(Duration::from_millis(200));
/// assert_eq!(policy.delay(2), Duration::from_millis(800));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of accepted `retry()` calls. Default: 3.
    pub max_retries: u32,
    /// Base delay before the first retry. Default: 1s.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(1_000),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that rejects every retry.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Set the retry ceiling.
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Set the base delay.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Delay before the retry that follows `retry_count` earlier retries.
    ///
    /// `retry_delay * 2^retry_count`, saturating instead of overflowing.
    pub fn delay(&self, retry_count: u32) -> Duration {
        self.retry_delay
            .saturating_mul(2u32.saturating_pow(retry_count))
    }

    /// Whether another retry is allowed after `retry_count` retries.
    pub fn allows(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }
}

/// Sleep for `delay` unless `cancel` fires first.
///
/// Returns `true` if the full delay elapsed, `false` if cancelled.
pub(crate) async fn backoff(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
