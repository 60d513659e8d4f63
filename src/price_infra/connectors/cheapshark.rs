use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, warn, Instrument};
use crate::error::SourceError;
use crate::observability::tracing::trace_source_request;
use crate::price_infra::connectors::{QuoteBatch, SourceAdapter};
use crate::price_infra::http::SourceHttpClient;
use crate::types::{EntityId, Price, PriceQuote, SourceId};

/// Keyless deal aggregator. One request per entity, keyed by Steam app id.
pub struct CheapSharkAdapter {
    http: SourceHttpClient,
    base_url: String,
    stores: BTreeMap<String, String>,
    store_filter: String,
}

impl CheapSharkAdapter {
    pub fn new(http: SourceHttpClient, base_url: String, stores: BTreeMap<String, String>) -> Self {
        let store_filter = stores.keys().cloned().collect::<Vec<_>>().join(",");
        CheapSharkAdapter {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            stores,
            store_filter,
        }
    }

    async fn fetch_one(&self, entity_id: &EntityId) -> Result<PriceQuote, SourceError> {
        let url = format!("{}/deals", self.base_url);
        let mut query = vec![("steamAppID", entity_id.to_string())];
        if !self.store_filter.is_empty() {
            query.push(("storeID", self.store_filter.clone()));
        }

        let deals: Vec<CheapSharkDeal> = self.http.get_json(&url, &query).await?;
        normalize_deals(self.http.source_id(), &deals, &self.stores)
    }
}

#[async_trait]
impl SourceAdapter for CheapSharkAdapter {
    fn source_id(&self) -> &SourceId {
        self.http.source_id()
    }

    async fn fetch_prices(&self, entity_ids: &[EntityId]) -> Result<QuoteBatch, SourceError> {
        let span = trace_source_request(self.source_id(), entity_ids.len());
        async {
            let mut batch = QuoteBatch::with_capacity(entity_ids.len());
            for entity_id in entity_ids {
                let outcome = self.fetch_one(entity_id).await;
                match &outcome {
                    Err(err) => warn!(entity_id = %entity_id, "CheapShark lookup failed: {}", err),
                    Ok(quote) => debug!(
                        entity_id = %entity_id,
                        available = quote.available,
                        "CheapShark quote"
                    ),
                }
                batch.insert(entity_id.clone(), outcome);
            }
            Ok(batch)
        }
        .instrument(span)
        .await
    }

    async fn validate_credential(&self) -> Result<bool, SourceError> {
        Ok(true)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheapSharkDeal {
    #[serde(rename = "storeID")]
    pub store_id: String,
    pub sale_price: String,
    pub normal_price: String,
    #[serde(default)]
    pub savings: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// Collapses a multi-store deal list into one quote: the cheapest deal among `stores`,
/// ties going to the higher saving and then the lower store id.
pub fn normalize_deals(
    source_id: &SourceId,
    deals: &[CheapSharkDeal],
    stores: &BTreeMap<String, String>,
) -> Result<PriceQuote, SourceError> {
    let mut parsed = Vec::new();
    let mut rejected = 0usize;

    for deal in deals {
        if !stores.is_empty() && !stores.contains_key(&deal.store_id) {
            continue;
        }
        let sale = Price::from_str(&deal.sale_price);
        let normal = Price::from_str(&deal.normal_price);
        match (sale, normal) {
            (Ok(sale), Ok(normal)) if !sale.is_negative() && !normal.is_negative() => {
                let savings = Decimal::from_str(deal.savings.trim()).unwrap_or(Decimal::ZERO);
                parsed.push((sale, normal, savings, deal));
            }
            _ => rejected += 1,
        }
    }

    if parsed.is_empty() {
        if rejected > 0 {
            return Err(SourceError::Data(format!("{} deals with unparseable prices", rejected)));
        }
        return Ok(PriceQuote::unavailable(source_id.clone()));
    }

    parsed.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then_with(|| b.2.cmp(&a.2))
            .then_with(|| store_order(&a.3.store_id).cmp(&store_order(&b.3.store_id)))
    });

    let (sale, normal, savings, deal) = &parsed[0];
    let discount = savings
        .round()
        .to_i64()
        .unwrap_or(0)
        .clamp(0, 100) as u8;
    let original = if normal > sale { *normal } else { *sale };

    let mut quote = PriceQuote::available(source_id.clone(), *sale, original, discount);
    if let Some(name) = stores.get(&deal.store_id) {
        quote = quote.with_storefront(name.clone());
    }
    Ok(quote)
}

/// Numeric store ids sort numerically, anything else after them.
fn store_order(store_id: &str) -> (u64, String) {
    (store_id.parse::<u64>().unwrap_or(u64::MAX), store_id.to_string())
}
