#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use price_tracker::error::{SourceError, StorageError, StorageResult};
use price_tracker::interfaces::{ManualClock, PersistenceStore, StoreStats};
use price_tracker::price_infra::{QuoteBatch, RateLimiter, SourceAdapter};
use price_tracker::types::{
    EntityId, Price, PriceQuote, PriceSnapshot, RefreshCandidate, SourceId, TrackedEntity,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(epoch()))
}

pub fn price(cents: i64) -> Price {
    Price::from_minor_units(cents)
}

/// Adapter answering from a fixed table; ids without an entry get an available quote at 9.99.
pub struct ScriptedAdapter {
    source_id: SourceId,
    responses: Mutex<HashMap<EntityId, Result<PriceQuote, SourceError>>>,
    credential_ok: AtomicBool,
    pub fetch_calls: AtomicUsize,
    pub validate_calls: AtomicUsize,
    limiter: Option<Arc<RateLimiter>>,
    delay: Duration,
}

impl ScriptedAdapter {
    pub fn new(source_id: &str) -> Self {
        ScriptedAdapter {
            source_id: SourceId::from(source_id),
            responses: Mutex::new(HashMap::new()),
            credential_ok: AtomicBool::new(true),
            fetch_calls: AtomicUsize::new(0),
            validate_calls: AtomicUsize::new(0),
            limiter: None,
            delay: Duration::ZERO,
        }
    }

    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn respond(&self, id: &str, outcome: Result<PriceQuote, SourceError>) {
        self.responses.lock().unwrap().insert(EntityId::from(id), outcome);
    }

    pub fn quote(&self, cents: i64, discount: u8) -> PriceQuote {
        PriceQuote::available(self.source_id.clone(), price(cents), price(cents * 2), discount)
    }

    pub fn reject_credentials(&self) {
        self.credential_ok.store(false, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    async fn fetch_prices(&self, entity_ids: &[EntityId]) -> Result<QuoteBatch, SourceError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let responses = self.responses.lock().unwrap().clone();
        Ok(entity_ids
            .iter()
            .map(|id| {
                let outcome = responses.get(id).cloned().unwrap_or_else(|| {
                    let source = self.source_id.clone();
                    Ok(PriceQuote::available(source, price(999), price(999), 0))
                });
                (id.clone(), outcome)
            })
            .collect())
    }

    async fn validate_credential(&self) -> Result<bool, SourceError> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.credential_ok.load(Ordering::SeqCst))
    }
}

/// Store wrapper that can be switched offline or made to reject commits for chosen ids.
pub struct FlakyStore<S> {
    inner: S,
    offline: AtomicBool,
    failing_commits: Mutex<Vec<EntityId>>,
}

impl<S> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        FlakyStore {
            inner,
            offline: AtomicBool::new(false),
            failing_commits: Mutex::new(Vec::new()),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn fail_commits_for(&self, id: &str) {
        self.failing_commits.lock().unwrap().push(EntityId::from(id));
    }

    fn check(&self) -> StorageResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable("database offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl<S: PersistenceStore> PersistenceStore for FlakyStore<S> {
    async fn health_check(&self) -> StorageResult<()> {
        self.check()?;
        self.inner.health_check().await
    }

    async fn register_entity(&self, entity: TrackedEntity) -> StorageResult<bool> {
        self.check()?;
        self.inner.register_entity(entity).await
    }

    async fn get_entity(&self, id: &EntityId) -> StorageResult<Option<TrackedEntity>> {
        self.check()?;
        self.inner.get_entity(id).await
    }

    async fn list_entities(&self, include_inactive: bool) -> StorageResult<Vec<TrackedEntity>> {
        self.check()?;
        self.inner.list_entities(include_inactive).await
    }

    async fn set_active(&self, id: &EntityId, active: bool) -> StorageResult<bool> {
        self.check()?;
        self.inner.set_active(id, active).await
    }

    async fn set_target_price(
        &self,
        id: &EntityId,
        target_price: Option<Price>,
    ) -> StorageResult<bool> {
        self.check()?;
        self.inner.set_target_price(id, target_price).await
    }

    async fn refresh_candidates(&self) -> StorageResult<Vec<RefreshCandidate>> {
        self.check()?;
        self.inner.refresh_candidates().await
    }

    async fn commit_snapshot(&self, snapshot: &PriceSnapshot) -> StorageResult<()> {
        self.check()?;
        if self.failing_commits.lock().unwrap().contains(&snapshot.entity_id) {
            return Err(StorageError::Query("constraint failed".into()));
        }
        self.inner.commit_snapshot(snapshot).await
    }

    async fn history(
        &self,
        id: &EntityId,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<PriceSnapshot>> {
        self.check()?;
        self.inner.history(id, since).await
    }

    async fn latest_snapshots(&self) -> StorageResult<Vec<PriceSnapshot>> {
        self.check()?;
        self.inner.latest_snapshots().await
    }

    async fn delete_snapshots_before(&self, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        self.check()?;
        self.inner.delete_snapshots_before(cutoff).await
    }

    async fn stats(&self, since: DateTime<Utc>) -> StorageResult<StoreStats> {
        self.check()?;
        self.inner.stats(since).await
    }
}
