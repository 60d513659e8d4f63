use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Entities not refreshed within this many hours are stale.
    pub stale_after_hours: f64,
    /// Upper bound on entities selected per cycle.
    pub max_batch_size: usize,
    /// Entities handed to the adapters per round.
    pub chunk_size: usize,
    pub prioritize: bool,
    pub chunk_pause_ms: u64,
}

impl TrackingConfig {
    pub fn stale_after(&self) -> Duration {
        hours(self.stale_after_hours)
    }

    pub fn chunk_pause(&self) -> Duration {
        Duration::from_millis(self.chunk_pause_ms)
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        TrackingConfig {
            stale_after_hours: 6.0,
            max_batch_size: 100,
            chunk_size: 50,
            prioritize: false,
            chunk_pause_ms: 0,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_hours: f64,
    pub autostart: bool,
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        hours(self.interval_hours)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            interval_hours: 6.0,
            autostart: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub enabled: bool,
    pub max_age_days: u32,
    pub sweep_interval_hours: f64,
}

impl RetentionConfig {
    pub fn sweep_interval(&self) -> Duration {
        hours(self.sweep_interval_hours)
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        RetentionConfig {
            enabled: true,
            max_age_days: 90,
            sweep_interval_hours: 168.0,  // weekly
        }
    }
}

/// Saturates instead of panicking on values too large for a `Duration`.
fn hours(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0) * 3600.0).unwrap_or(Duration::MAX)
}
