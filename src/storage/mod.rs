pub mod memory_store;
pub mod sqlite_store;

use std::sync::Arc;
use crate::config::{StorageBackend, StorageConfig};
use crate::error::Result;
use crate::interfaces::PersistenceStore;

pub use memory_store::MemoryStore;
pub use sqlite_store::SqliteStore;

pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn PersistenceStore>> {
    let store: Arc<dyn PersistenceStore> = match config.backend {
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
        StorageBackend::Sqlite => Arc::new(SqliteStore::open(&config.path)?),
    };
    Ok(store)
}
