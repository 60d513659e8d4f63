use serde::{Deserialize, Serialize};
use crate::types::ids::SourceId;
use crate::types::price::Price;

/// One source's canonical price report for one entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub source_id: SourceId,
    pub price: Option<Price>,
    pub original_price: Option<Price>,
    pub discount_percent: u8,
    pub available: bool,
    /// Concrete shop behind the quote when the source aggregates several stores.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storefront: Option<String>,
}

impl PriceQuote {
    pub fn available(
        source_id: SourceId,
        price: Price,
        original_price: Price,
        discount_percent: u8,
    ) -> Self {
        PriceQuote {
            source_id,
            price: Some(price),
            original_price: Some(original_price),
            discount_percent: discount_percent.min(100),
            available: true,
            storefront: None,
        }
    }

    pub fn unavailable(source_id: SourceId) -> Self {
        PriceQuote {
            source_id,
            price: None,
            original_price: None,
            discount_percent: 0,
            available: false,
            storefront: None,
        }
    }

    pub fn with_storefront(mut self, storefront: impl Into<String>) -> Self {
        self.storefront = Some(storefront.into());
        self
    }
}
