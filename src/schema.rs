//! Persisted document types
//!
//! A `FileRecord` is stored as one JSON document per file identity:
//!
//! ```json
//! {"id":"doc1","version":3,"subscribedClients":[{"clientId":"A","subscribedAt":"..."}],...}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a connected client, established upstream by authentication
pub type ClientId = String;

/// Identity of a trackable file
pub type FileId = String;

/// One client's interest in a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberEntry {
    pub client_id: ClientId,
    #[serde(default = "Utc::now")]
    pub subscribed_at: DateTime<Utc>,
}

/// Persisted state for one file: identity, version and subscriber set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: FileId,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub subscribed_clients: Vec<SubscriberEntry>,
    /// Bookkeeping only; documents written without timestamps still load
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    /// Create an empty record at version 0
    pub fn new(id: impl Into<FileId>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            version: 0,
            subscribed_clients: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_subscribed(&self, client_id: &str) -> bool {
        self.subscribed_clients
            .iter()
            .any(|entry| entry.client_id == client_id)
    }

    /// Add a subscriber. Returns false (and leaves the record untouched) if
    /// the client is already subscribed.
    pub fn add_subscriber(&mut self, client_id: &str) -> bool {
        if self.is_subscribed(client_id) {
            return false;
        }
        let now = Utc::now();
        self.subscribed_clients.push(SubscriberEntry {
            client_id: client_id.to_string(),
            subscribed_at: now,
        });
        self.updated_at = now;
        true
    }

    /// Remove a subscriber. Returns false if the client was not subscribed.
    pub fn remove_subscriber(&mut self, client_id: &str) -> bool {
        let before = self.subscribed_clients.len();
        self.subscribed_clients
            .retain(|entry| entry.client_id != client_id);
        let removed = self.subscribed_clients.len() != before;
        if removed {
            self.updated_at = Utc::now();
        }
        removed
    }

    /// Set the version, returning the previous one
    pub fn set_version(&mut self, version: u64) -> u64 {
        let previous = self.version;
        self.version = version;
        self.updated_at = Utc::now();
        previous
    }

    /// Snapshot of subscriber identities, in subscription order
    pub fn subscriber_ids(&self) -> Vec<ClientId> {
        self.subscribed_clients
            .iter()
            .map(|entry| entry.client_id.clone())
            .collect()
    }
}
