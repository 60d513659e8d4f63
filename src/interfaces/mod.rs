pub mod clock;
pub mod persistence_store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use persistence_store::{PersistenceStore, StoreStats};
