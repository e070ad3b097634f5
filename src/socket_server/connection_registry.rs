//! Live connection registry
//!
//! Maps each client identity to its single live transport. The registry is
//! owned by the daemon and shared as `Arc<ConnectionRegistry>`; it is the
//! only mutable state shared between connection tasks.
//!
//! # Lifecycle
//!
//! `register` returns a [`Registration`] guard. The connection task holds it
//! for as long as the socket is open; when the task ends (close frame, read
//! error, heartbeat timeout) the guard is dropped and the entry is removed
//! before the task yields again.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

use crate::error::{Result, ServiceError};
use crate::schema::ClientId;
use crate::socket_server::protocol::ServerMessage;

/// Outbound half of a client transport. The connection's writer task owns
/// the receiving end and forwards frames to the socket.
pub type Transport = mpsc::Sender<ServerMessage>;

/// Handle to one registered transport
#[derive(Debug, Clone)]
pub struct ClientHandle {
    connection_id: String,
    sender: Transport,
}

impl ClientHandle {
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// True once the writer side has gone away
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Queue a message, waiting at most `timeout` for queue space
    pub async fn send(&self, client_id: &str, msg: ServerMessage, timeout: Duration) -> Result<()> {
        self.sender
            .send_timeout(msg, timeout)
            .await
            .map_err(|e| ServiceError::TransportSendFailure {
                client_id: client_id.to_string(),
                message: match e {
                    SendTimeoutError::Timeout(_) => format!("timed out after {:?}", timeout),
                    SendTimeoutError::Closed(_) => "transport closed".to_string(),
                },
            })
    }
}

/// Registry of live client transports
#[derive(Default)]
pub struct ConnectionRegistry {
    clients: RwLock<HashMap<ClientId, ClientHandle>>,
}

impl ConnectionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `client_id` to `transport`.
    ///
    /// Fails with `AlreadyConnected` if the identity already has a live
    /// transport; the existing entry is left untouched. The check and the
    /// insert happen under one write lock.
    pub fn register(self: &Arc<Self>, client_id: &str, transport: Transport) -> Result<Registration> {
        let connection_id = format!("conn_{}", uuid::Uuid::new_v4().simple());

        {
            let mut clients = self.clients.write();
            match clients.entry(client_id.to_string()) {
                Entry::Occupied(mut existing) => {
                    if !existing.get().is_closed() {
                        return Err(ServiceError::AlreadyConnected {
                            client_id: client_id.to_string(),
                        });
                    }
                    // Writer already gone; its guard is about to clean up.
                    tracing::debug!(
                        "Replacing closed transport {} for {}",
                        existing.get().connection_id,
                        client_id
                    );
                    existing.insert(ClientHandle {
                        connection_id: connection_id.clone(),
                        sender: transport,
                    });
                }
                Entry::Vacant(slot) => {
                    slot.insert(ClientHandle {
                        connection_id: connection_id.clone(),
                        sender: transport,
                    });
                }
            }
        }

        tracing::info!(
            "Registered {} as {} ({} connected)",
            client_id,
            connection_id,
            self.len()
        );
        Ok(Registration {
            registry: Arc::clone(self),
            client_id: client_id.to_string(),
            connection_id,
        })
    }

    /// Live transport for a client, if any
    pub fn lookup(&self, client_id: &str) -> Option<ClientHandle> {
        self.clients
            .read()
            .get(client_id)
            .filter(|handle| !handle.is_closed())
            .cloned()
    }

    pub fn is_connected(&self, client_id: &str) -> bool {
        self.lookup(client_id).is_some()
    }

    /// Remove a client's entry. Returns false if it was already absent.
    pub fn deregister(&self, client_id: &str) -> bool {
        let removed = self.clients.write().remove(client_id).is_some();
        if removed {
            tracing::info!("Deregistered {}", client_id);
        }
        removed
    }

    /// Remove the entry only if it still belongs to `connection_id`
    fn deregister_connection(&self, client_id: &str, connection_id: &str) -> bool {
        let mut clients = self.clients.write();
        match clients.get(client_id) {
            Some(handle) if handle.connection_id == connection_id => {
                clients.remove(client_id);
                tracing::info!("Deregistered {} ({})", client_id, connection_id);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }
}

/// Registration guard; dropping it removes the client's entry
pub struct Registration {
    registry: Arc<ConnectionRegistry>,
    client_id: ClientId,
    connection_id: String,
}

impl Registration {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("client_id", &self.client_id)
            .field("connection_id", &self.connection_id)
            .finish()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry
            .deregister_connection(&self.client_id, &self.connection_id);
    }
}
