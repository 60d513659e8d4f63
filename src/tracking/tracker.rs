use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use crate::config::{AppConfig, TrackingConfig};
use crate::error::{Error, Result};
use crate::interfaces::{Clock, PersistenceStore, SystemClock};
use crate::price_infra::{
    CredentialState, PriceSource, RateLimiterRegistry, SourceAdapter, SourceRegistry, SourceStatus,
};
use crate::storage::open_store;
use crate::tracking::orchestrator::{BatchOrchestrator, OrchestratorSettings};
use crate::tracking::retention::{DataRetentionManager, RetentionPolicy};
use crate::tracking::scheduler::{CycleParams, SchedulerLoop, SchedulerStatus};
use crate::types::{
    EntityId, EntitySource, Price, PriceSnapshot, RunSummary, RunTrigger, SourceId,
    TrackedEntity,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackerStatistics {
    pub tracked_entities: usize,
    pub inactive_entities: usize,
    pub total_snapshots: usize,
    pub snapshots_last_24h: usize,
    pub oldest_snapshot: Option<DateTime<Utc>>,
    pub newest_snapshot: Option<DateTime<Utc>>,
    pub sources: Vec<SourceStatus>,
}

/// An active entity whose latest best price reached its target.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceAlert {
    pub entity_id: EntityId,
    pub name: String,
    pub target_price: Price,
    pub best_price: Price,
    pub best_source_id: Option<SourceId>,
    pub max_discount: u8,
    pub observed_at: DateTime<Utc>,
}

/// Entry point for every external operation on the engine.
pub struct PriceTracker {
    store: Arc<dyn PersistenceStore>,
    clock: Arc<dyn Clock>,
    sources: Arc<SourceRegistry>,
    orchestrator: Arc<BatchOrchestrator>,
    scheduler: SchedulerLoop,
    retention: Arc<DataRetentionManager>,
    tracking: TrackingConfig,
}

impl PriceTracker {
    pub fn new(
        store: Arc<dyn PersistenceStore>,
        sources: Arc<SourceRegistry>,
        clock: Arc<dyn Clock>,
        tracking: TrackingConfig,
        retention: RetentionPolicy,
    ) -> Self {
        let orchestrator = Arc::new(BatchOrchestrator::new(
            store.clone(),
            sources.clone(),
            clock.clone(),
            OrchestratorSettings::from(&tracking),
        ));
        let scheduler = SchedulerLoop::new(
            orchestrator.clone(),
            clock.clone(),
            CycleParams {
                stale_after: tracking.stale_after(),
                max_batch_size: tracking.max_batch_size,
            },
        );
        let retention =
            Arc::new(DataRetentionManager::new(store.clone(), clock.clone(), retention));

        PriceTracker {
            store,
            clock,
            sources,
            orchestrator,
            scheduler,
            retention,
            tracking,
        }
    }

    /// Opens the configured store and builds one adapter per enabled source.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let store = open_store(&config.storage)?;
        let limiters = RateLimiterRegistry::new();
        let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();
        for source in config.enabled_sources() {
            adapters.push(Arc::new(PriceSource::from_config(source, &limiters)?));
        }
        info!(
            sources = adapters.len(),
            backend = ?config.storage.backend,
            "Price tracker assembled"
        );

        Ok(PriceTracker::new(
            store,
            Arc::new(SourceRegistry::new(adapters)),
            Arc::new(SystemClock),
            config.tracking.clone(),
            RetentionPolicy::from(&config.retention),
        ))
    }

    pub fn retention_manager(&self) -> Arc<DataRetentionManager> {
        self.retention.clone()
    }

    pub async fn health_check(&self) -> Result<()> {
        self.store.health_check().await.map_err(|e| Error::StoreUnavailable(e.to_string()))
    }

    /// Returns true when the id was newly registered or reactivated.
    pub async fn register_entity(
        &self,
        id: EntityId,
        name: impl Into<String>,
        target_price: Option<Price>,
    ) -> Result<bool> {
        self.register_entity_from(id, name, target_price, EntitySource::Manual).await
    }

    pub async fn register_entity_from(
        &self,
        id: EntityId,
        name: impl Into<String>,
        target_price: Option<Price>,
        source: EntitySource,
    ) -> Result<bool> {
        if id.as_str().trim().is_empty() {
            return Err(Error::InvalidArgument("entity id must not be empty".into()));
        }
        validate_target(target_price)?;

        let entity = TrackedEntity::new(id.clone(), name, self.clock.now())
            .with_target_price(target_price)
            .with_source(source);
        let changed = self.store.register_entity(entity).await?;
        if changed {
            info!(entity_id = %id, "Entity registered");
        }
        Ok(changed)
    }

    pub async fn deactivate_entity(&self, id: &EntityId) -> Result<bool> {
        self.require_entity(id).await?;
        Ok(self.store.set_active(id, false).await?)
    }

    pub async fn set_target_price(&self, id: &EntityId, target_price: Option<Price>) -> Result<()> {
        validate_target(target_price)?;
        if !self.store.set_target_price(id, target_price).await? {
            return Err(Error::EntityNotFound(id.clone()));
        }
        Ok(())
    }

    pub async fn list_entities(&self, include_inactive: bool) -> Result<Vec<TrackedEntity>> {
        Ok(self.store.list_entities(include_inactive).await?)
    }

    /// Runs one cycle now with the configured staleness threshold.
    pub async fn trigger_cycle_now(&self, max_batch_size: Option<usize>) -> Result<RunSummary> {
        let max = max_batch_size.unwrap_or(self.tracking.max_batch_size);
        if max == 0 {
            return Err(Error::InvalidArgument("max_batch_size must be positive".into()));
        }
        self.orchestrator
            .run_cycle(RunTrigger::Manual, self.tracking.stale_after(), max)
            .await
    }

    pub async fn refresh_entities(&self, ids: &[EntityId]) -> Result<RunSummary> {
        self.orchestrator.run_for(ids).await
    }

    /// Snapshots at or after `since`, oldest first.
    pub async fn get_history(
        &self,
        id: &EntityId,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriceSnapshot>> {
        Ok(self.store.history(id, since).await?)
    }

    pub async fn get_best_deals(
        &self,
        min_discount: u8,
        max_price: Option<Price>,
        limit: usize,
    ) -> Result<Vec<PriceSnapshot>> {
        let latest = self.store.latest_snapshots().await?;
        Ok(best_deals(latest, min_discount, max_price, limit))
    }

    pub fn start_scheduler(&self, interval: Duration) -> Result<SchedulerStatus> {
        self.scheduler.start(interval)
    }

    pub async fn stop_scheduler(&self) -> SchedulerStatus {
        self.scheduler.stop().await
    }

    pub fn scheduler_status(&self) -> SchedulerStatus {
        self.scheduler.status()
    }

    pub async fn cleanup_older_than(&self, days: u32) -> Result<usize> {
        self.retention.cleanup_older_than(days).await
    }

    /// Copies the store to a new file at `dest`.
    pub async fn backup_database(&self, dest: &Path) -> Result<()> {
        self.store.backup(dest).await?;
        info!(path = %dest.display(), "Price store backup written");
        Ok(())
    }

    pub async fn statistics(&self) -> Result<TrackerStatistics> {
        let since = self.clock.now() - ChronoDuration::hours(24);
        let stats = self.store.stats(since).await?;
        Ok(TrackerStatistics {
            tracked_entities: stats.tracked_entities,
            inactive_entities: stats.inactive_entities,
            total_snapshots: stats.total_snapshots,
            snapshots_last_24h: stats.snapshots_since,
            oldest_snapshot: stats.oldest_snapshot,
            newest_snapshot: stats.newest_snapshot,
            sources: self.sources.statuses(),
        })
    }

    pub async fn price_alerts(&self) -> Result<Vec<PriceAlert>> {
        let entities = self.store.list_entities(false).await?;
        let latest = self.store.latest_snapshots().await?;
        Ok(price_alerts(&entities, &latest))
    }

    pub fn source_statuses(&self) -> Vec<SourceStatus> {
        self.sources.statuses()
    }

    pub fn reinstate_source(&self, source_id: &SourceId) -> Result<CredentialState> {
        self.sources.reinstate(source_id)
    }

    async fn require_entity(&self, id: &EntityId) -> Result<TrackedEntity> {
        self.store
            .get_entity(id)
            .await?
            .ok_or_else(|| Error::EntityNotFound(id.clone()))
    }
}

fn validate_target(target_price: Option<Price>) -> Result<()> {
    match target_price {
        Some(price) if price.is_negative() => {
            Err(Error::InvalidArgument(format!("target price {} is negative", price)))
        }
        _ => Ok(()),
    }
}

/// Latest snapshots with a best price, at least `min_discount` off and at most `max_price`,
/// ordered by discount (desc), price (asc), entity id (asc).
pub fn best_deals(
    mut snapshots: Vec<PriceSnapshot>,
    min_discount: u8,
    max_price: Option<Price>,
    limit: usize,
) -> Vec<PriceSnapshot> {
    snapshots.retain(|s| match s.best_price {
        Some(price) => s.max_discount >= min_discount && max_price.is_none_or(|max| price <= max),
        None => false,
    });
    snapshots.sort_by(|a, b| {
        b.max_discount
            .cmp(&a.max_discount)
            .then_with(|| a.best_price.cmp(&b.best_price))
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
    snapshots.truncate(limit);
    snapshots
}

pub fn price_alerts(entities: &[TrackedEntity], latest: &[PriceSnapshot]) -> Vec<PriceAlert> {
    let mut alerts: Vec<PriceAlert> = entities
        .iter()
        .filter(|e| e.active)
        .filter_map(|entity| {
            let target = entity.target_price?;
            let snapshot = latest.iter().find(|s| s.entity_id == entity.id)?;
            let best = snapshot.best_price?;
            (best <= target).then(|| PriceAlert {
                entity_id: entity.id.clone(),
                name: entity.name.clone(),
                target_price: target,
                best_price: best,
                best_source_id: snapshot.best_source_id.clone(),
                max_discount: snapshot.max_discount,
                observed_at: snapshot.timestamp,
            })
        })
        .collect();
    alerts.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn snap(id: &str, price: Option<&str>, discount: u8) -> PriceSnapshot {
        PriceSnapshot {
            entity_id: EntityId::from(id),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            per_source: BTreeMap::new(),
            best_price: price.map(|p| p.parse().unwrap()),
            best_source_id: price.map(|_| SourceId::from("steam")),
            max_discount: discount,
        }
    }

    #[test]
    fn best_deals_filter_and_order() {
        let deals = best_deals(
            vec![
                snap("c", Some("9.99"), 50),
                snap("a", Some("4.99"), 50),
                snap("b", Some("4.99"), 50),
                snap("d", Some("1.00"), 80),
                snap("e", Some("30.00"), 90),
                snap("f", None, 95),
                snap("g", Some("2.00"), 10),
            ],
            25,
            Some("20".parse().unwrap()),
            10,
        );
        let ids: Vec<&str> = deals.iter().map(|s| s.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["d", "a", "b", "c"]);
    }

    #[test]
    fn best_deals_respects_limit() {
        let latest = vec![snap("a", Some("1"), 10), snap("b", Some("1"), 20)];
        let deals = best_deals(latest, 0, None, 1);
        assert_eq!(deals.len(), 1);
        assert_eq!(deals[0].entity_id.as_str(), "b");
    }

    #[test]
    fn alerts_fire_at_or_below_target() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let target = Some("5".parse().unwrap());
        let entities = vec![
            TrackedEntity::new(EntityId::from("a"), "A", t).with_target_price(target),
            TrackedEntity::new(EntityId::from("b"), "B", t).with_target_price(target),
            TrackedEntity::new(EntityId::from("c"), "C", t),
        ];
        let latest =
            vec![snap("a", Some("5.00"), 0), snap("b", Some("5.01"), 0), snap("c", Some("1"), 0)];

        let alerts = price_alerts(&entities, &latest);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].entity_id.as_str(), "a");
    }
}
