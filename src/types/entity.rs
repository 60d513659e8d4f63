use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::types::ids::EntityId;
use crate::types::price::Price;

/// How an entity entered the registry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitySource {
    #[default]
    Manual,
    Imported,
    Discovered,
}

impl EntitySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntitySource::Manual => "manual",
            EntitySource::Imported => "imported",
            EntitySource::Discovered => "discovered",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "manual" => Some(EntitySource::Manual),
            "imported" => Some(EntitySource::Imported),
            "discovered" => Some(EntitySource::Discovered),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackedEntity {
    pub id: EntityId,
    pub name: String,
    pub added_at: DateTime<Utc>,
    pub last_update_at: Option<DateTime<Utc>>,
    pub target_price: Option<Price>,
    pub active: bool,
    pub source: EntitySource,
}

impl TrackedEntity {
    pub fn new(id: EntityId, name: impl Into<String>, added_at: DateTime<Utc>) -> Self {
        TrackedEntity {
            id,
            name: name.into(),
            added_at,
            last_update_at: None,
            target_price: None,
            active: true,
            source: EntitySource::Manual,
        }
    }

    pub fn with_target_price(mut self, target_price: Option<Price>) -> Self {
        self.target_price = target_price;
        self
    }

    pub fn with_source(mut self, source: EntitySource) -> Self {
        self.source = source;
        self
    }
}

/// Registry row joined with the most recent snapshot's discount, used for staleness selection.
#[derive(Clone, Debug, PartialEq)]
pub struct RefreshCandidate {
    pub id: EntityId,
    pub active: bool,
    pub last_update_at: Option<DateTime<Utc>>,
    pub target_price: Option<Price>,
    pub last_max_discount: Option<u8>,
}

impl From<&TrackedEntity> for RefreshCandidate {
    fn from(entity: &TrackedEntity) -> Self {
        RefreshCandidate {
            id: entity.id.clone(),
            active: entity.active,
            last_update_at: entity.last_update_at,
            target_price: entity.target_price,
            last_max_discount: None,
        }
    }
}
