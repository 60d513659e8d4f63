pub mod aggregator;
pub mod connectors;
pub mod http;
pub mod rate_limiter;
pub mod retry;
pub mod source_registry;

pub use aggregator::SnapshotAggregator;
pub use connectors::{PriceSource, QuoteBatch, SourceAdapter};
pub use rate_limiter::{RateLimiter, RateLimiterRegistry};
pub use retry::RetryPolicy;
pub use source_registry::{CredentialState, SourceRegistry, SourceStatus};
