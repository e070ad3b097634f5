//! Cache invalidation service
//!
//! Keeps a registry of connected clients and the files each one caches, and
//! pushes an invalidation message to every live subscriber when a file's
//! version changes. Delivery is best-effort: clients that are offline when
//! a file changes are skipped, not queued.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use cache_invalidation::{CacheService, ConnectionRegistry, MemoryStore};
//!
//! let registry = Arc::new(ConnectionRegistry::new());
//! let service = CacheService::new(Arc::new(MemoryStore::new()), registry, Duration::from_secs(2));
//!
//! let (tx, mut rx) = tokio::sync::mpsc::channel(16);
//! let _registration = service.on_connect("client-a", tx)?;
//! service.on_subscribe("client-a", "doc1").await;
//! service.on_file_updated("doc1", 1).await;
//! // rx now yields ServerMessage::Invalidate { fileId: "doc1", version: 1, .. }
//! ```

pub mod config;
pub mod error;
pub mod schema;
pub mod socket_server;
pub mod store;

// Re-export commonly used types
pub use config::{ServiceConfig, StoreBackend};
pub use error::{Result, ServiceError};
pub use schema::{ClientId, FileId, FileRecord, SubscriberEntry};
pub use socket_server::{
    Ack, CacheService, ConnectionOptions, ConnectionRegistry, DispatchReport, Invalidation,
    ServerMessage,
};
pub use store::{DocumentStore, MemoryStore, SqliteStore};
