pub mod api;
pub mod config;
pub mod error;
pub mod interfaces;
pub mod observability;
pub mod price_infra;
pub mod storage;
pub mod tracking;
pub mod types;
pub mod utils;

pub use error::{Error, Result};
pub use tracking::PriceTracker;
