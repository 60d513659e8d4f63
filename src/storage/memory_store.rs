//! In-memory persistence backed by DashMap.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;
use crate::error::{StorageError, StorageResult};
use crate::interfaces::{PersistenceStore, StoreStats};
use crate::types::{EntityId, Price, PriceSnapshot, RefreshCandidate, TrackedEntity};

/// Registry row and its history live in one map entry, so a commit holds a single shard lock.
#[derive(Clone, Debug)]
struct EntityRecord {
    entity: TrackedEntity,
    snapshots: Vec<PriceSnapshot>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<DashMap<EntityId, EntityRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
        }
    }

    pub fn snapshot_count(&self) -> usize {
        self.records.iter().map(|r| r.snapshots.len()).sum()
    }
}

#[async_trait]
impl PersistenceStore for MemoryStore {
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn register_entity(&self, entity: TrackedEntity) -> StorageResult<bool> {
        let mut inserted = true;
        self.records
            .entry(entity.id.clone())
            .and_modify(|record| {
                if record.entity.active {
                    inserted = false;
                } else {
                    record.entity.active = true;
                    record.entity.name = entity.name.clone();
                    if entity.target_price.is_some() {
                        record.entity.target_price = entity.target_price;
                    }
                }
            })
            .or_insert_with(|| EntityRecord {
                entity: entity.clone(),
                snapshots: Vec::new(),
            });
        Ok(inserted)
    }

    async fn get_entity(&self, id: &EntityId) -> StorageResult<Option<TrackedEntity>> {
        Ok(self.records.get(id).map(|r| r.entity.clone()))
    }

    async fn list_entities(&self, include_inactive: bool) -> StorageResult<Vec<TrackedEntity>> {
        let mut entities: Vec<TrackedEntity> = self
            .records
            .iter()
            .filter(|r| include_inactive || r.entity.active)
            .map(|r| r.entity.clone())
            .collect();
        entities.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entities)
    }

    async fn set_active(&self, id: &EntityId, active: bool) -> StorageResult<bool> {
        match self.records.get_mut(id) {
            Some(mut record) => {
                let changed = record.entity.active != active;
                record.entity.active = active;
                Ok(changed)
            }
            None => Ok(false),
        }
    }

    async fn set_target_price(
        &self,
        id: &EntityId,
        target_price: Option<Price>,
    ) -> StorageResult<bool> {
        match self.records.get_mut(id) {
            Some(mut record) => {
                record.entity.target_price = target_price;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn refresh_candidates(&self) -> StorageResult<Vec<RefreshCandidate>> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.entity.active)
            .map(|r| {
                let mut candidate = RefreshCandidate::from(&r.entity);
                candidate.last_max_discount = r.snapshots.last().map(|s| s.max_discount);
                candidate
            })
            .collect())
    }

    async fn commit_snapshot(&self, snapshot: &PriceSnapshot) -> StorageResult<()> {
        let mut record = self
            .records
            .get_mut(&snapshot.entity_id)
            .ok_or_else(|| StorageError::EntityNotFound(snapshot.entity_id.clone()))?;

        let position = record
            .snapshots
            .partition_point(|existing| existing.timestamp <= snapshot.timestamp);
        record.snapshots.insert(position, snapshot.clone());

        let newest = record.snapshots.last().map(|s| s.timestamp);
        record.entity.last_update_at = newest.max(record.entity.last_update_at);
        Ok(())
    }

    async fn history(
        &self,
        id: &EntityId,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<PriceSnapshot>> {
        Ok(self
            .records
            .get(id)
            .map(|r| {
                r.snapshots
                    .iter()
                    .filter(|s| s.timestamp >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn latest_snapshots(&self) -> StorageResult<Vec<PriceSnapshot>> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.entity.active)
            .filter_map(|r| r.snapshots.last().cloned())
            .collect())
    }

    async fn delete_snapshots_before(&self, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        let mut deleted = 0;
        for mut record in self.records.iter_mut() {
            let before = record.snapshots.len();
            record.snapshots.retain(|s| s.timestamp >= cutoff);
            deleted += before - record.snapshots.len();
        }
        debug!(deleted, %cutoff, "Memory store retention pass");
        Ok(deleted)
    }

    async fn stats(&self, since: DateTime<Utc>) -> StorageResult<StoreStats> {
        let mut stats = StoreStats::default();
        for record in self.records.iter() {
            if record.entity.active {
                stats.tracked_entities += 1;
            } else {
                stats.inactive_entities += 1;
            }
            stats.total_snapshots += record.snapshots.len();
            stats.snapshots_since +=
                record.snapshots.iter().filter(|s| s.timestamp >= since).count();
            if let Some(first) = record.snapshots.first() {
                let first = first.timestamp;
                stats.oldest_snapshot = Some(stats.oldest_snapshot.map_or(first, |t| t.min(first)));
            }
            if let Some(last) = record.snapshots.last() {
                let last = last.timestamp;
                stats.newest_snapshot = Some(stats.newest_snapshot.map_or(last, |t| t.max(last)));
            }
        }
        Ok(stats)
    }
}
