use std::time::Duration;
use crate::config::RetryConfig;
use crate::error::SourceError;

/// Bounded exponential backoff for retryable source errors.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_backoff: Duration, max_backoff: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base_backoff,
            max_backoff,
        }
    }

    pub fn no_retry() -> Self {
        RetryPolicy::new(1, Duration::ZERO, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the attempt following `attempt` (1-based), or `None` when the error
    /// is final or the attempt cap is reached.
    pub fn backoff(&self, attempt: u32, err: &SourceError) -> Option<Duration> {
        if !err.is_retryable() || attempt >= self.max_attempts {
            return None;
        }

        if let SourceError::RateLimited { retry_after: Some(wait) } = err {
            return Some((*wait).min(self.max_backoff));
        }

        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_backoff.saturating_mul(1u32 << exponent);
        Some(delay.min(self.max_backoff))
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy::new(
            config.max_attempts,
            Duration::from_millis(config.base_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        )
    }
}
