//! In-memory document store

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use super::DocumentStore;
use crate::error::{Result, ServiceError};
use crate::schema::FileRecord;

/// Process-local store. Records live as long as the store.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, FileRecord>>,
    /// When set, every `save` fails (lets tests exercise persistence errors)
    fail_saves: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent saves fail with `PersistenceFailure`
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl DocumentStore for MemoryStore {
    fn load(&self, id: &str) -> Result<Option<FileRecord>> {
        Ok(self.records.read().get(id).cloned())
    }

    fn save(&self, record: &FileRecord) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(ServiceError::PersistenceFailure {
                message: format!("save of {} rejected", record.id),
            });
        }
        self.records
            .write()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn list_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.records.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
