//! SQLite-backed document store
//!
//! Records are kept as JSON text in a single table so the on-disk shape is
//! exactly the document format clients and operators see.

use std::fs;
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use super::DocumentStore;
use crate::error::Result;
use crate::schema::FileRecord;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file and ensure the schema exists
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        Self::create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn create_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS files (
                 id TEXT PRIMARY KEY NOT NULL,
                 document TEXT NOT NULL
             );",
        )?;
        Ok(())
    }
}

impl DocumentStore for SqliteStore {
    fn load(&self, id: &str) -> Result<Option<FileRecord>> {
        let conn = self.conn.lock();
        let document: Option<String> = conn
            .query_row(
                "SELECT document FROM files WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        match document {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn save(&self, record: &FileRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO files (id, document) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET document = excluded.document",
            params![record.id, json],
        )?;
        Ok(())
    }

    fn list_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id FROM files ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_roundtrip_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("files.db");

        let mut record = FileRecord::new("doc1");
        record.add_subscriber("A");
        record.set_version(7);

        {
            let store = SqliteStore::open(&path).unwrap();
            store.save(&record).unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.load("doc1").unwrap(), Some(record));
        assert!(reopened.load("doc2").unwrap().is_none());
    }

    #[test]
    fn test_save_replaces_existing_document() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut record = FileRecord::new("doc1");
        store.save(&record).unwrap();

        record.add_subscriber("B");
        store.save(&record).unwrap();

        let loaded = store.load("doc1").unwrap().unwrap();
        assert_eq!(loaded.subscriber_ids(), vec!["B".to_string()]);
        assert_eq!(store.list_ids().unwrap(), vec!["doc1".to_string()]);
    }
}
