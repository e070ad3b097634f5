//! Socket server protocol message types
//!
//! Defines the JSON message format for client-server communication.

use serde::{Deserialize, Serialize};

use crate::schema::{ClientId, FileId, FileRecord};

/// Client-to-server message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Bind this socket to an authenticated client identity
    Connect {
        client_id: ClientId,
    },
    /// Start receiving invalidations for a file
    Subscribe {
        file_id: FileId,
    },
    /// Stop receiving invalidations for a file
    Unsubscribe {
        file_id: FileId,
    },
    /// A file changed upstream (inter-service signal)
    Notify {
        file_id: FileId,
        version: u64,
    },
    /// Fetch the stored record for a file
    Query {
        file_id: FileId,
    },
    /// Ping to check connection
    Ping,
}

/// Server-to-client message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Identity bound to this socket
    Connected {
        client_id: ClientId,
        connection_id: String,
    },
    /// Outcome of subscribe, unsubscribe or notify
    Ack(Ack),
    /// Query response
    Subscribers {
        record: FileRecord,
    },
    /// A newer version of a subscribed file exists
    Invalidate(Invalidation),
    /// Error response
    Error {
        code: String,
        message: String,
    },
    /// Pong response
    Pong,
}

/// Result of an entry-point operation as reported to the invoker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
    pub message: String,
}

impl Ack {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// Invalidation payload pushed to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invalidation {
    pub message: String,
    pub file_id: FileId,
    pub version: u64,
}

impl Invalidation {
    pub fn new(file_id: &str, version: u64) -> Self {
        Self {
            message: format!("{} has been updated to version {}", file_id, version),
            file_id: file_id.to_string(),
            version,
        }
    }
}
