use chrono::{DateTime, Duration, Utc};
use std::cmp::Reverse;
use std::sync::Arc;
use crate::error::{Error, Result};
use crate::interfaces::{Clock, PersistenceStore};
use crate::types::{EntityId, RefreshCandidate};

/// Stale when never refreshed or when the last refresh is at least `threshold` old.
pub fn is_stale(candidate: &RefreshCandidate, now: DateTime<Utc>, threshold: Duration) -> bool {
    candidate.active
        && match candidate.last_update_at {
            None => true,
            Some(last) => now - last >= threshold,
        }
}

/// 2 when the entity has a target price and its last snapshot was discounted,
/// 1 for either, 0 otherwise.
pub fn priority_tier(candidate: &RefreshCandidate) -> u8 {
    let has_target = candidate.target_price.is_some();
    let discounted = candidate.last_max_discount.unwrap_or(0) > 0;
    has_target as u8 + discounted as u8
}

/// Filters, orders and caps the refresh candidates.
///
/// Order: never refreshed first, then oldest refresh, then id. With `prioritize`,
/// the priority tier (descending) comes before all of that.
pub fn select(
    candidates: Vec<RefreshCandidate>,
    now: DateTime<Utc>,
    threshold: Duration,
    max_count: usize,
    prioritize: bool,
) -> Vec<EntityId> {
    let mut stale: Vec<RefreshCandidate> = candidates
        .into_iter()
        .filter(|c| is_stale(c, now, threshold))
        .collect();

    stale.sort_by(|a, b| {
        let tier = if prioritize {
            Reverse(priority_tier(a)).cmp(&Reverse(priority_tier(b)))
        } else {
            std::cmp::Ordering::Equal
        };
        // `None` sorts before `Some`, so never-refreshed entities lead.
        tier.then_with(|| a.last_update_at.cmp(&b.last_update_at))
            .then_with(|| a.id.cmp(&b.id))
    });

    stale.into_iter().take(max_count).map(|c| c.id).collect()
}

pub struct StalenessSelector {
    store: Arc<dyn PersistenceStore>,
    clock: Arc<dyn Clock>,
}

impl StalenessSelector {
    pub fn new(store: Arc<dyn PersistenceStore>, clock: Arc<dyn Clock>) -> Self {
        StalenessSelector { store, clock }
    }

    pub async fn select_stale(
        &self,
        threshold: std::time::Duration,
        max_count: usize,
        prioritize: bool,
    ) -> Result<Vec<EntityId>> {
        let threshold = Duration::from_std(threshold)
            .map_err(|e| Error::InvalidArgument(format!("staleness threshold: {}", e)))?;
        let candidates = self.store.refresh_candidates().await?;
        let total = candidates.len();
        let selected = select(candidates, self.clock.now(), threshold, max_count, prioritize);

        tracing::debug!(
            active = total,
            selected = selected.len(),
            threshold_secs = threshold.num_seconds(),
            "Selected stale entities"
        );
        Ok(selected)
    }
}
