pub mod orchestrator;
pub mod retention;
pub mod scheduler;
pub mod staleness;
pub mod tracker;

pub use orchestrator::{BatchOrchestrator, OrchestratorSettings};
pub use retention::{DataRetentionManager, RetentionPolicy};
pub use scheduler::{CycleParams, SchedulerLoop, SchedulerState, SchedulerStatus};
pub use staleness::StalenessSelector;
pub use tracker::{PriceAlert, PriceTracker, TrackerStatistics};
