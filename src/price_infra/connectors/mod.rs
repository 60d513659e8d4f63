pub mod cheapshark;
pub mod steam_store;

use async_trait::async_trait;
use std::collections::HashMap;
use crate::config::{SourceConfig, SourceKind};
use crate::error::{Result, SourceError};
use crate::price_infra::http::SourceHttpClient;
use crate::price_infra::rate_limiter::RateLimiterRegistry;
use crate::price_infra::retry::RetryPolicy;
use crate::types::{EntityId, PriceQuote, SourceId};

pub use cheapshark::CheapSharkAdapter;
pub use steam_store::SteamStoreAdapter;

/// Per-entity outcome of one `fetch_prices` call.
pub type QuoteBatch = HashMap<EntityId, std::result::Result<PriceQuote, SourceError>>;

/// Canonical capability every price source exposes to the orchestrator.
///
/// `fetch_prices` returns an outer error only when the whole source is unusable
/// (a rejected credential); everything else is reported per entity.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &SourceId;

    async fn fetch_prices(
        &self,
        entity_ids: &[EntityId],
    ) -> std::result::Result<QuoteBatch, SourceError>;

    async fn validate_credential(&self) -> std::result::Result<bool, SourceError>;
}

pub enum PriceSource {
    CheapShark(CheapSharkAdapter),
    SteamStore(SteamStoreAdapter),
}

impl PriceSource {
    /// Builds the adapter for `config`, wiring it to the shared limiter for its source id.
    pub fn from_config(config: &SourceConfig, limiters: &RateLimiterRegistry) -> Result<Self> {
        let source_id = SourceId::new(config.source_id.clone());
        let limiter = limiters.register(source_id.clone(), config.min_interval());
        let http = SourceHttpClient::new(
            source_id,
            limiter,
            config.timeout(),
            RetryPolicy::from(&config.retry),
        )?;

        let source = match &config.kind {
            SourceKind::CheapShark { base_url, stores } => {
                let adapter = CheapSharkAdapter::new(http, base_url.clone(), stores.clone());
                PriceSource::CheapShark(adapter)
            }
            SourceKind::SteamStore {
                store_url,
                api_url,
                api_key_env,
                country_code,
                max_ids_per_request,
            } => {
                let api_key = api_key_env
                    .as_deref()
                    .and_then(|name| std::env::var(name).ok())
                    .filter(|key| !key.trim().is_empty());
                PriceSource::SteamStore(SteamStoreAdapter::new(
                    http,
                    store_url.clone(),
                    api_url.clone(),
                    api_key,
                    country_code.clone(),
                    *max_ids_per_request,
                ))
            }
        };
        Ok(source)
    }
}

#[async_trait]
impl SourceAdapter for PriceSource {
    fn source_id(&self) -> &SourceId {
        match self {
            PriceSource::CheapShark(adapter) => adapter.source_id(),
            PriceSource::SteamStore(adapter) => adapter.source_id(),
        }
    }

    async fn fetch_prices(
        &self,
        entity_ids: &[EntityId],
    ) -> std::result::Result<QuoteBatch, SourceError> {
        match self {
            PriceSource::CheapShark(adapter) => adapter.fetch_prices(entity_ids).await,
            PriceSource::SteamStore(adapter) => adapter.fetch_prices(entity_ids).await,
        }
    }

    async fn validate_credential(&self) -> std::result::Result<bool, SourceError> {
        match self {
            PriceSource::CheapShark(adapter) => adapter.validate_credential().await,
            PriceSource::SteamStore(adapter) => adapter.validate_credential().await,
        }
    }
}
