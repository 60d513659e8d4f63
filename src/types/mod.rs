pub mod entity;
pub mod ids;
pub mod price;
pub mod quote;
pub mod run_summary;
pub mod snapshot;

pub use entity::{EntitySource, RefreshCandidate, TrackedEntity};
pub use ids::{EntityId, RunId, SourceId};
pub use price::Price;
pub use quote::PriceQuote;
pub use run_summary::{RunSummary, RunTrigger};
pub use snapshot::PriceSnapshot;
