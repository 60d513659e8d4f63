use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use crate::types::ids::{EntityId, SourceId};
use crate::types::price::Price;
use crate::types::quote::PriceQuote;

/// Aggregated, immutable record of all quotes for one entity at one point in time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub entity_id: EntityId,
    pub timestamp: DateTime<Utc>,
    pub per_source: BTreeMap<SourceId, PriceQuote>,
    pub best_price: Option<Price>,
    pub best_source_id: Option<SourceId>,
    pub max_discount: u8,
}

impl PriceSnapshot {
    pub fn best_quote(&self) -> Option<&PriceQuote> {
        self.best_source_id
            .as_ref()
            .and_then(|source_id| self.per_source.get(source_id))
    }
}
