//! Cache Invalidation Socket Server
//!
//! A standalone daemon that tracks which clients cache which files and
//! pushes an invalidation to every live subscriber when a file's version
//! advances.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 CACHE INVALIDATION DAEMON (cache-invalidation-daemon)   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  CacheService                                                           │
//! │    ├── ConnectionRegistry (Arc, RwLock<HashMap>)                        │
//! │    │     client_id ──► ClientHandle { connection_id, outbound queue }   │
//! │    ├── SubscriptionStore (per-file async locks)                         │
//! │    │     file_id ──► FileRecord { version, subscribedClients }          │
//! │    │                  └── DocumentStore (memory | sqlite)               │
//! │    └── InvalidationDispatcher (concurrent fan-out, per-send timeout)    │
//! │                                                                         │
//! │  WebSocket Server ──► ConnectionState per client                        │
//! │    - reader task: message routing, heartbeat timeout                    │
//! │    - writer task: outbound queue, heartbeat pings                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol
//!
//! All messages are JSON over WebSocket:
//!
//! ```json
//! // Client -> Server
//! {"type": "connect", "client_id": "A"}
//! {"type": "subscribe", "file_id": "doc1"}
//! {"type": "unsubscribe", "file_id": "doc1"}
//! {"type": "notify", "file_id": "doc1", "version": 2}
//! {"type": "query", "file_id": "doc1"}
//!
//! // Server -> Client
//! {"type": "connected", "client_id": "A", "connection_id": "conn_..."}
//! {"type": "ack", "ok": true, "message": "..."}
//! {"type": "invalidate", "message": "...", "fileId": "doc1", "version": 2}
//! {"type": "error", "code": "not_connected", "message": "..."}
//! ```

pub mod connection;
pub mod connection_registry;
pub mod dispatcher;
pub mod protocol;
pub mod service;
pub mod subscription_store;

pub use connection::{handle_connection, serve, ConnectionOptions};
pub use connection_registry::{ClientHandle, ConnectionRegistry, Registration, Transport};
pub use dispatcher::{DispatchReport, InvalidationDispatcher};
pub use protocol::{Ack, ClientMessage, Invalidation, ServerMessage};
pub use service::{CacheService, NO_SUBSCRIBERS_MESSAGE};
pub use subscription_store::{PendingUpdate, SubscribeOutcome, SubscriptionStore};
