use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn, Instrument};
use crate::error::SourceError;
use crate::observability::tracing::trace_source_request;
use crate::price_infra::connectors::{QuoteBatch, SourceAdapter};
use crate::price_infra::http::SourceHttpClient;
use crate::types::{EntityId, Price, PriceQuote, SourceId};

/// Public account id looked up only to check whether the Web API key is accepted.
const SAMPLE_STEAM_ID: &str = "76561197960435530";

/// Steam storefront `appdetails`, batched over several app ids per request.
pub struct SteamStoreAdapter {
    http: SourceHttpClient,
    store_url: String,
    api_url: String,
    api_key: Option<String>,
    country_code: String,
    max_ids_per_request: usize,
}

impl SteamStoreAdapter {
    pub fn new(
        http: SourceHttpClient,
        store_url: String,
        api_url: String,
        api_key: Option<String>,
        country_code: String,
        max_ids_per_request: usize,
    ) -> Self {
        SteamStoreAdapter {
            http,
            store_url: store_url.trim_end_matches('/').to_string(),
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            country_code,
            max_ids_per_request: max_ids_per_request.max(1),
        }
    }

    async fn fetch_chunk(
        &self,
        chunk: &[EntityId],
    ) -> Result<HashMap<String, AppDetailsEntry>, SourceError> {
        let url = format!("{}/appdetails", self.store_url);
        let appids = chunk.iter().map(|id| id.as_str()).collect::<Vec<_>>().join(",");
        let query = vec![
            ("appids", appids),
            ("filters", "price_overview".to_string()),
            ("cc", self.country_code.clone()),
        ];
        self.http.get_json(&url, &query).await
    }
}

#[async_trait]
impl SourceAdapter for SteamStoreAdapter {
    fn source_id(&self) -> &SourceId {
        self.http.source_id()
    }

    async fn fetch_prices(&self, entity_ids: &[EntityId]) -> Result<QuoteBatch, SourceError> {
        let span = trace_source_request(self.source_id(), entity_ids.len());
        async {
            let mut batch = QuoteBatch::with_capacity(entity_ids.len());

            let (valid, invalid): (Vec<EntityId>, Vec<EntityId>) =
                entity_ids.iter().cloned().partition(is_app_id);
            for id in invalid {
                let err = SourceError::Data(format!("{} is not a Steam app id", id));
                batch.insert(id, Err(err));
            }

            for chunk in valid.chunks(self.max_ids_per_request) {
                match self.fetch_chunk(chunk).await {
                    Ok(mut entries) => {
                        for id in chunk {
                            let outcome = match entries.remove(id.as_str()) {
                                Some(entry) => entry_to_quote(self.source_id(), &entry),
                                None => Err(SourceError::Data(format!(
                                    "app {} missing from response",
                                    id
                                ))),
                            };
                            batch.insert(id.clone(), outcome);
                        }
                    }
                    Err(err) => {
                        warn!(entities = chunk.len(), "Steam appdetails request failed: {}", err);
                        for id in chunk {
                            batch.insert(id.clone(), Err(err.clone()));
                        }
                    }
                }
            }

            debug!(entities = batch.len(), "Steam quotes collected");
            Ok(batch)
        }
        .instrument(span)
        .await
    }

    async fn validate_credential(&self) -> Result<bool, SourceError> {
        let Some(key) = &self.api_key else {
            return Ok(true);
        };

        let url = format!("{}/ISteamUser/GetPlayerSummaries/v0002/", self.api_url);
        let query = vec![("key", key.clone()), ("steamids", SAMPLE_STEAM_ID.to_string())];
        match self.http.get_json_authenticated::<PlayerSummaries>(&url, &query).await {
            Ok(summary) => Ok(summary.response.and_then(|r| r.players).is_some()),
            Err(err) if err.is_credential() => Ok(false),
            Err(err) => Err(err),
        }
    }
}

fn is_app_id(id: &EntityId) -> bool {
    !id.as_str().is_empty() && id.as_str().bytes().all(|b| b.is_ascii_digit())
}

#[derive(Debug, Deserialize)]
pub struct AppDetailsEntry {
    pub success: bool,
    /// An object when the app has data, an empty array when it does not.
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct PriceOverview {
    pub initial: i64,
    #[serde(rename = "final")]
    pub final_price: i64,
    #[serde(default)]
    pub discount_percent: i64,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlayerSummaries {
    response: Option<PlayerSummariesResponse>,
}

#[derive(Debug, Deserialize)]
struct PlayerSummariesResponse {
    players: Option<Vec<serde_json::Value>>,
}

pub fn entry_to_quote(
    source_id: &SourceId,
    entry: &AppDetailsEntry,
) -> Result<PriceQuote, SourceError> {
    if !entry.success {
        return Ok(PriceQuote::unavailable(source_id.clone()));
    }

    let Some(raw) = entry.data.get("price_overview") else {
        return Ok(PriceQuote::unavailable(source_id.clone()));
    };

    let overview: PriceOverview = serde_json::from_value(raw.clone())
        .map_err(|e| SourceError::Data(format!("price_overview: {}", e)))?;
    if overview.final_price < 0 || overview.initial < 0 {
        return Err(SourceError::Data("negative price in price_overview".to_string()));
    }

    let price = Price::from_minor_units(overview.final_price);
    let original = Price::from_minor_units(overview.initial.max(overview.final_price));
    let discount = overview.discount_percent.clamp(0, 100) as u8;
    Ok(PriceQuote::available(source_id.clone(), price, original, discount))
}
