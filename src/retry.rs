use crate::config::RetryConfig;
use crate::types::RateLimitInfo;
use std::time::Duration;

/// How rate-limited requests are retried.
///
/// The server's reset hint wins over the backoff. Without one the wait starts
/// at `fallback_wait` and doubles per rate-limited attempt, capped at
/// `max_wait`. A hint above `max_wait` is not waited out, see [`Self::allows_wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total requests issued for one operation, the first one included
    pub max_attempts: u32,
    pub fallback_wait: Duration,
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            fallback_wait: Duration::from_millis(10_000),
            max_wait: Duration::from_millis(120_000),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: config.max_attempts.unwrap_or(defaults.max_attempts).max(1),
            fallback_wait: config
                .fallback_wait_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.fallback_wait),
            max_wait: config
                .max_wait_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_wait),
        }
    }
}

impl RetryPolicy {
    /// Whether another request may follow the `attempt`-th (1-based) rate-limited one
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Wait before re-issuing after the `attempt`-th (1-based) rate-limited response.
    ///
    /// Hints too large for a `Duration` saturate to `Duration::MAX`.
    pub fn wait_for(&self, info: Option<&RateLimitInfo>, attempt: u32) -> Duration {
        if let Some(reset_ms) = info.and_then(|info| info.reset_ms) {
            // float to int casts saturate
            return Duration::from_millis(reset_ms.max(0.0).ceil() as u64);
        }
        if let Some(reset_sec) = info.and_then(|info| info.reset_sec) {
            return Duration::try_from_secs_f64(reset_sec.max(0.0)).unwrap_or(Duration::MAX);
        }

        let exponent = attempt.saturating_sub(1).min(16);
        self.fallback_wait
            .saturating_mul(2_u32.pow(exponent))
            .min(self.max_wait)
    }

    /// Whether `wait` is short enough to sleep through before retrying
    pub fn allows_wait(&self, wait: Duration) -> bool {
        wait <= self.max_wait
    }
}
