//! Document store collaborator for file records
//!
//! The subscription store only needs load/save of whole `FileRecord`
//! documents keyed by file identity. Two backends are provided:
//!
//! - `MemoryStore` - process-local map, used by tests and `backend = "memory"`
//! - `SqliteStore` - durable single-table store, one JSON document per row

pub mod memory;
pub mod sqlite;

use std::sync::Arc;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::Result;
use crate::schema::FileRecord;

/// Generic key/document store holding one `FileRecord` per file identity
pub trait DocumentStore: Send + Sync {
    /// Load the record for `id`, `Ok(None)` if it has never been saved
    fn load(&self, id: &str) -> Result<Option<FileRecord>>;

    /// Insert or replace the record under `record.id`
    fn save(&self, record: &FileRecord) -> Result<()>;

    /// All stored identities, sorted
    fn list_ids(&self) -> Result<Vec<String>>;
}

/// Open the store described by the configuration
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn DocumentStore>> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::info!("Using in-memory document store (records are not durable)");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Sqlite => {
            let path = config.resolved_path();
            tracing::info!("Opening SQLite document store at {}", path.display());
            let store = SqliteStore::open(&path)?;
            tracing::info!("Loaded {} file records", store.list_ids()?.len());
            Ok(Arc::new(store))
        }
    }
}
