use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use crate::observability::metrics::RATE_LIMIT_WAIT_SECONDS;
use crate::types::SourceId;

/// Minimum spacing between granted acquisitions for one source.
///
/// Waiters queue on a fair `tokio::sync::Mutex`, so grants are handed out in arrival order
/// whether the caller is the scheduler or a foreground trigger.
pub struct RateLimiter {
    source_id: SourceId,
    min_interval: Duration,
    last_granted: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(source_id: SourceId, min_interval: Duration) -> Self {
        RateLimiter {
            source_id,
            min_interval,
            last_granted: Mutex::new(None),
        }
    }

    pub fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Waits for the next slot and returns how long the caller was held back.
    pub async fn acquire(&self) -> Duration {
        let requested_at = Instant::now();
        let mut last = self.last_granted.lock().await;

        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }

        let granted_at = Instant::now();
        *last = Some(granted_at);

        let waited = granted_at.duration_since(requested_at);
        RATE_LIMIT_WAIT_SECONDS
            .with_label_values(&[self.source_id.as_str()])
            .observe(waited.as_secs_f64());
        if !waited.is_zero() {
            tracing::trace!(
                source_id = %self.source_id,
                waited_ms = waited.as_millis() as u64,
                "Rate limiter delayed request"
            );
        }
        waited
    }
}

/// One shared limiter per source id, so every caller of a source draws from the same slots.
#[derive(Default)]
pub struct RateLimiterRegistry {
    limiters: DashMap<SourceId, Arc<RateLimiter>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        RateLimiterRegistry {
            limiters: DashMap::new(),
        }
    }

    /// Returns the existing limiter for `source_id`, creating it on first use.
    /// The interval of an already registered source is not changed.
    pub fn register(&self, source_id: SourceId, min_interval: Duration) -> Arc<RateLimiter> {
        self.limiters
            .entry(source_id.clone())
            .or_insert_with(|| Arc::new(RateLimiter::new(source_id, min_interval)))
            .clone()
    }
}
