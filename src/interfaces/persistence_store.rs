use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use crate::error::{StorageError, StorageResult};
use crate::types::{EntityId, Price, PriceSnapshot, RefreshCandidate, TrackedEntity};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub tracked_entities: usize,
    pub inactive_entities: usize,
    pub total_snapshots: usize,
    pub snapshots_since: usize,
    pub oldest_snapshot: Option<DateTime<Utc>>,
    pub newest_snapshot: Option<DateTime<Utc>>,
}

/// Owner of the entity registry and the append-only snapshot history.
///
/// `commit_snapshot` is the unit of atomicity: the entity's `last_update_at` moves to the
/// snapshot timestamp and the snapshot is appended, or neither happens.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Cheap reachability check. `StorageError::Unavailable` aborts a whole cycle.
    async fn health_check(&self) -> StorageResult<()>;

    /// Inserts a new entity or reactivates an inactive one.
    /// Returns false when the id is already registered and active.
    async fn register_entity(&self, entity: TrackedEntity) -> StorageResult<bool>;

    async fn get_entity(&self, id: &EntityId) -> StorageResult<Option<TrackedEntity>>;

    async fn list_entities(&self, include_inactive: bool) -> StorageResult<Vec<TrackedEntity>>;

    async fn set_active(&self, id: &EntityId, active: bool) -> StorageResult<bool>;

    async fn set_target_price(
        &self,
        id: &EntityId,
        target_price: Option<Price>,
    ) -> StorageResult<bool>;

    /// Active entities with the discount of their most recent snapshot.
    async fn refresh_candidates(&self) -> StorageResult<Vec<RefreshCandidate>>;

    async fn commit_snapshot(&self, snapshot: &PriceSnapshot) -> StorageResult<()>;

    /// Snapshots for one entity at or after `since`, oldest first.
    async fn history(
        &self,
        id: &EntityId,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<PriceSnapshot>>;

    /// Most recent snapshot of every active entity.
    async fn latest_snapshots(&self) -> StorageResult<Vec<PriceSnapshot>>;

    /// Deletes snapshots strictly older than `cutoff`; the registry is left untouched.
    async fn delete_snapshots_before(&self, cutoff: DateTime<Utc>) -> StorageResult<usize>;

    async fn stats(&self, since: DateTime<Utc>) -> StorageResult<StoreStats>;

    /// Gives space freed by deletions back to the backend. Stores with nothing to reclaim
    /// keep the default no-op.
    async fn compact(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Writes a consistent copy of the whole store to `dest`, which must not exist yet.
    async fn backup(&self, _dest: &Path) -> StorageResult<()> {
        Err(StorageError::Unsupported("backup"))
    }
}
