use futures::future::join_all;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};
use crate::config::TrackingConfig;
use crate::error::{Error, Result, SourceError, StorageError};
use crate::interfaces::{Clock, PersistenceStore};
use crate::observability::metrics::{
    CYCLES_TOTAL, CYCLE_DURATION_SECONDS, ENTITIES_FAILED_TOTAL, ENTITIES_REFRESHED_TOTAL,
};
use crate::observability::tracing::trace_cycle;
use crate::price_infra::{QuoteBatch, SnapshotAggregator, SourceAdapter, SourceRegistry};
use crate::tracking::staleness::StalenessSelector;
use crate::types::{EntityId, PriceQuote, RunSummary, RunTrigger, SourceId};

#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    pub chunk_size: usize,
    pub chunk_pause: Duration,
    pub prioritize: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        OrchestratorSettings::from(&TrackingConfig::default())
    }
}

impl From<&TrackingConfig> for OrchestratorSettings {
    fn from(config: &TrackingConfig) -> Self {
        OrchestratorSettings {
            chunk_size: config.chunk_size.max(1),
            chunk_pause: config.chunk_pause(),
            prioritize: config.prioritize,
        }
    }
}

/// Drives one refresh cycle: select, fetch through the limiters, aggregate, commit.
///
/// Only credential rejection, an unreachable store and the loss of every source escape
/// as errors; everything else is recorded per entity in the returned summary.
pub struct BatchOrchestrator {
    store: Arc<dyn PersistenceStore>,
    sources: Arc<SourceRegistry>,
    selector: StalenessSelector,
    aggregator: SnapshotAggregator,
    clock: Arc<dyn Clock>,
    settings: OrchestratorSettings,
}

impl BatchOrchestrator {
    pub fn new(
        store: Arc<dyn PersistenceStore>,
        sources: Arc<SourceRegistry>,
        clock: Arc<dyn Clock>,
        settings: OrchestratorSettings,
    ) -> Self {
        BatchOrchestrator {
            selector: StalenessSelector::new(store.clone(), clock.clone()),
            aggregator: SnapshotAggregator::new(clock.clone()),
            store,
            sources,
            clock,
            settings,
        }
    }

    pub fn sources(&self) -> &Arc<SourceRegistry> {
        &self.sources
    }

    /// Refreshes up to `max_batch_size` entities not updated within `threshold`.
    pub async fn run_cycle(
        &self,
        trigger: RunTrigger,
        threshold: Duration,
        max_batch_size: usize,
    ) -> Result<RunSummary> {
        let summary = RunSummary::begin(trigger, self.clock.now());
        let span = trace_cycle(&summary.run_id, trigger);
        async move {
            let sources = self.preflight().await?;
            let ids = self
                .selector
                .select_stale(threshold, max_batch_size, self.settings.prioritize)
                .await?;
            self.execute(summary, ids, sources).await
        }
        .instrument(span)
        .await
        .inspect_err(|e| record_aborted(trigger, e))
    }

    /// Refreshes an explicit id list regardless of staleness.
    /// Unknown and inactive ids are skipped with a warning.
    pub async fn run_for(&self, entity_ids: &[EntityId]) -> Result<RunSummary> {
        let trigger = RunTrigger::Targeted;
        let summary = RunSummary::begin(trigger, self.clock.now());
        let span = trace_cycle(&summary.run_id, trigger);
        async move {
            let sources = self.preflight().await?;

            let mut seen = HashSet::new();
            let mut ids = Vec::with_capacity(entity_ids.len());
            for id in entity_ids {
                if !seen.insert(id.clone()) {
                    continue;
                }
                match self.store.get_entity(id).await.map_err(store_error)? {
                    Some(entity) if entity.active => ids.push(entity.id),
                    Some(_) => warn!(entity_id = %id, "Skipping inactive entity"),
                    None => warn!(entity_id = %id, "Skipping unknown entity"),
                }
            }
            self.execute(summary, ids, sources).await
        }
        .instrument(span)
        .await
        .inspect_err(|e| record_aborted(trigger, e))
    }

    async fn preflight(&self) -> Result<Vec<Arc<dyn SourceAdapter>>> {
        self.store.health_check().await.map_err(store_error)?;
        self.sources.ensure_validated().await?;

        let active = self.sources.active();
        if active.is_empty() {
            return Err(Error::NoActiveSources);
        }
        Ok(active)
    }

    async fn execute(
        &self,
        mut summary: RunSummary,
        ids: Vec<EntityId>,
        sources: Vec<Arc<dyn SourceAdapter>>,
    ) -> Result<RunSummary> {
        let started = Instant::now();
        info!(
            entities = ids.len(),
            sources = sources.len(),
            chunk_size = self.settings.chunk_size,
            "Starting refresh cycle"
        );

        let chunks: Vec<&[EntityId]> = ids.chunks(self.settings.chunk_size).collect();
        for (index, chunk) in chunks.iter().enumerate() {
            if index > 0 && !self.settings.chunk_pause.is_zero() {
                tokio::time::sleep(self.settings.chunk_pause).await;
            }
            debug!(
                chunk = index + 1,
                of = chunks.len(),
                entities = chunk.len(),
                "Processing chunk"
            );
            self.process_chunk(chunk, &sources, &mut summary).await?;
            summary.batches += 1;
        }

        let elapsed = started.elapsed();
        summary.finish(self.clock.now(), elapsed);

        CYCLES_TOTAL
            .with_label_values(&[summary.trigger.as_str(), "completed"])
            .inc();
        CYCLE_DURATION_SECONDS.observe(summary.duration_seconds);
        info!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed.len(),
            batches = summary.batches,
            duration_secs = summary.duration_seconds,
            "Refresh cycle finished"
        );
        Ok(summary)
    }

    async fn process_chunk(
        &self,
        chunk: &[EntityId],
        sources: &[Arc<dyn SourceAdapter>],
        summary: &mut RunSummary,
    ) -> Result<()> {
        let results = join_all(sources.iter().map(|source| source.fetch_prices(chunk))).await;

        let mut batches: Vec<(SourceId, QuoteBatch)> = Vec::with_capacity(sources.len());
        for (source, result) in sources.iter().zip(results) {
            let source_id = source.source_id().clone();
            match result {
                Ok(batch) => batches.push((source_id, batch)),
                Err(SourceError::Credential(reason)) => {
                    self.sources.revoke(&source_id, reason.clone())?;
                    return Err(Error::CredentialRejected { source_id, reason });
                }
                Err(err) => {
                    warn!(source_id = %source_id, "Source failed for whole chunk: {}", err);
                    let batch = chunk.iter().map(|id| (id.clone(), Err(err.clone()))).collect();
                    batches.push((source_id, batch));
                }
            }
        }

        for entity_id in chunk {
            let mut quotes = BTreeMap::new();
            let mut failure: Option<(SourceId, SourceError)> = None;

            for (source_id, batch) in batches.iter_mut() {
                match batch.remove(entity_id) {
                    Some(Ok(quote)) => {
                        quotes.insert(source_id.clone(), normalize_source(quote, source_id));
                    }
                    Some(Err(err)) => {
                        failure.get_or_insert((source_id.clone(), err));
                    }
                    None => {
                        failure.get_or_insert((
                            source_id.clone(),
                            SourceError::Data("no result returned".to_string()),
                        ));
                    }
                }
            }

            if let Some((source_id, err)) = failure {
                warn!(
                    entity_id = %entity_id,
                    source_id = %source_id,
                    kind = err.kind(),
                    "Entity refresh failed: {}", err
                );
                ENTITIES_FAILED_TOTAL.inc();
                summary.record_failure(entity_id.clone());
                continue;
            }

            let snapshot = self.aggregator.aggregate(entity_id.clone(), quotes);
            match self.store.commit_snapshot(&snapshot).await {
                Ok(()) => {
                    debug!(
                        entity_id = %entity_id,
                        best_price = ?snapshot.best_price,
                        best_source = ?snapshot.best_source_id,
                        max_discount = snapshot.max_discount,
                        "Snapshot stored"
                    );
                    ENTITIES_REFRESHED_TOTAL.inc();
                    summary.record_success();
                }
                Err(err) if err.is_unavailable() => {
                    summary.record_failure(entity_id.clone());
                    return Err(Error::StoreUnavailable(err.to_string()));
                }
                Err(err) => {
                    error!(entity_id = %entity_id, "Failed to commit snapshot: {}", err);
                    ENTITIES_FAILED_TOTAL.inc();
                    summary.record_failure(entity_id.clone());
                }
            }
        }
        Ok(())
    }
}

/// Adapters key their quotes by the configured source id; keep the map and the quote consistent.
fn normalize_source(mut quote: PriceQuote, source_id: &SourceId) -> PriceQuote {
    if &quote.source_id != source_id {
        quote.source_id = source_id.clone();
    }
    quote
}

fn store_error(err: StorageError) -> Error {
    if err.is_unavailable() {
        Error::StoreUnavailable(err.to_string())
    } else {
        Error::Storage(err)
    }
}

fn record_aborted(trigger: RunTrigger, err: &Error) {
    CYCLES_TOTAL.with_label_values(&[trigger.as_str(), "aborted"]).inc();
    error!(trigger = trigger.as_str(), "Refresh cycle aborted: {}", err);
}
