use chrono::Duration;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use crate::config::RetentionConfig;
use crate::error::{Error, Result};
use crate::interfaces::{Clock, PersistenceStore};
use crate::observability::metrics::SNAPSHOTS_DELETED_TOTAL;

pub struct RetentionPolicy {
    pub max_age: Duration,
    pub sweep_interval: std::time::Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy::from(&RetentionConfig::default())
    }
}

impl From<&RetentionConfig> for RetentionPolicy {
    fn from(config: &RetentionConfig) -> Self {
        RetentionPolicy {
            max_age: Duration::days(config.max_age_days as i64),
            sweep_interval: config.sweep_interval(),
        }
    }
}

/// Age-based snapshot cleanup. The entity registry is never touched.
pub struct DataRetentionManager {
    store: Arc<dyn PersistenceStore>,
    clock: Arc<dyn Clock>,
    policy: RetentionPolicy,
}

impl DataRetentionManager {
    pub fn new(
        store: Arc<dyn PersistenceStore>,
        clock: Arc<dyn Clock>,
        policy: RetentionPolicy,
    ) -> Self {
        DataRetentionManager { store, clock, policy }
    }

    /// Deletes snapshots with `timestamp < now - days`.
    pub async fn cleanup_older_than(&self, days: u32) -> Result<usize> {
        let cutoff = Duration::try_days(days as i64)
            .and_then(|age| self.clock.now().checked_sub_signed(age))
            .ok_or_else(|| {
                Error::InvalidArgument(format!("retention of {} days is out of range", days))
            })?;
        let deleted = self.store.delete_snapshots_before(cutoff).await?;

        SNAPSHOTS_DELETED_TOTAL.inc_by(deleted as u64);
        info!(days, %cutoff, deleted, "Retention cleanup finished");
        if deleted > 0 {
            // Deletions are already committed at this point.
            if let Err(e) = self.store.compact().await {
                warn!("Store compaction after cleanup failed: {}", e);
            }
        }
        Ok(deleted)
    }

    pub async fn sweep(&self) -> Result<usize> {
        let days = self.policy.max_age.num_days().clamp(0, u32::MAX as i64) as u32;
        self.cleanup_older_than(days).await
    }

    /// Sweeps once per interval until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            max_age_days = self.policy.max_age.num_days(),
            interval_hours = self.policy.sweep_interval.as_secs() / 3600,
            "Retention sweeper started"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.policy.sweep_interval) => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.sweep().await {
                error!("Retention sweep failed: {}", e);
            }
        }
        info!("Retention sweeper stopped");
    }
}
