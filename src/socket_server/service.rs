//! Service entry points
//!
//! `CacheService` is the surface the transport layer calls into. It ties the
//! connection registry, the subscription store and the dispatcher together
//! and turns their errors into the `Ack` responses invokers see.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, ServiceError};
use crate::schema::FileRecord;
use crate::socket_server::connection_registry::{ConnectionRegistry, Registration, Transport};
use crate::socket_server::dispatcher::InvalidationDispatcher;
use crate::socket_server::protocol::Ack;
use crate::socket_server::subscription_store::{SubscribeOutcome, SubscriptionStore};
use crate::store::DocumentStore;

/// Reply to a notification for a file nobody subscribed to
pub const NO_SUBSCRIBERS_MESSAGE: &str = "Uh, thanks but I have no subscribers for that file..";

pub struct CacheService {
    registry: Arc<ConnectionRegistry>,
    subscriptions: SubscriptionStore,
    dispatcher: InvalidationDispatcher,
}

impl CacheService {
    pub fn new(store: Arc<dyn DocumentStore>, registry: Arc<ConnectionRegistry>, send_timeout: Duration) -> Self {
        Self {
            subscriptions: SubscriptionStore::new(store, Arc::clone(&registry)),
            dispatcher: InvalidationDispatcher::new(Arc::clone(&registry), send_timeout),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Bind a client identity to its transport
    pub fn on_connect(&self, client_id: &str, transport: Transport) -> Result<Registration> {
        self.registry.register(client_id, transport)
    }

    pub async fn on_subscribe(&self, client_id: &str, file_id: &str) -> Ack {
        match self.subscriptions.subscribe(file_id, client_id).await {
            Ok(SubscribeOutcome::Added) => Ack::ok(format!(
                "{} has been successfully subscribed to {}",
                client_id, file_id
            )),
            Ok(SubscribeOutcome::AlreadySubscribed) => Ack::ok(format!(
                "{} is already subscribed to {}",
                client_id, file_id
            )),
            Err(e @ ServiceError::NoLiveConnection { .. }) => {
                tracing::info!("Rejected subscribe to {}: {}", file_id, e);
                Ack::failed(format!(
                    "{} must open a socket before subscribing to {}",
                    client_id, file_id
                ))
            }
            Err(e) => {
                tracing::error!("Error saving a cache entry for {}: {}", file_id, e);
                Ack::failed(format!("Error saving a cache entry for {}", file_id))
            }
        }
    }

    pub async fn on_unsubscribe(&self, client_id: &str, file_id: &str) -> Ack {
        match self.subscriptions.unsubscribe(file_id, client_id).await {
            Ok(true) => Ack::ok(format!(
                "{} has been successfully unsubscribed from {}",
                client_id, file_id
            )),
            Ok(false) => Ack::ok(format!("{} was not subscribed to {}", client_id, file_id)),
            Err(ServiceError::FileNotFound { .. }) => {
                tracing::info!("File {} has no subscribers", file_id);
                Ack::failed(format!("File {} has no subscribers", file_id))
            }
            Err(e) => {
                tracing::error!("Error saving a cache entry for {}: {}", file_id, e);
                Ack::failed(format!("Error saving a cache entry for {}", file_id))
            }
        }
    }

    /// A file changed upstream: update its version and notify live subscribers.
    ///
    /// Unknown files are an informational success. A persistence failure is
    /// reported, but invalidations already sent are not recalled.
    pub async fn on_file_updated(&self, file_id: &str, version: u64) -> Ack {
        let pending = match self.subscriptions.record_update(file_id, version).await {
            Ok(pending) => pending,
            Err(ServiceError::FileNotFound { .. }) => {
                tracing::info!("Update for {} with no subscribers", file_id);
                return Ack::ok(NO_SUBSCRIBERS_MESSAGE);
            }
            Err(e) => {
                tracing::error!("Error loading cache entry for {}: {}", file_id, e);
                return Ack::failed(format!(
                    "Error updating a cache entry for {} to version {}",
                    file_id, version
                ));
            }
        };

        tracing::debug!(
            "Updating {} from version {} to {}",
            file_id,
            pending.previous_version(),
            version
        );
        self.dispatcher
            .dispatch(file_id, version, pending.subscribers())
            .await;

        match pending.commit() {
            Ok(_) => Ack::ok(format!(
                "Updated {} to version {}, notifying clients",
                file_id, version
            )),
            Err(e) => {
                tracing::error!(
                    "Error updating a cache entry for {} to version {}: {}",
                    file_id,
                    version,
                    e
                );
                Ack::failed(format!(
                    "Error updating a cache entry for {} to version {}",
                    file_id, version
                ))
            }
        }
    }

    pub async fn on_query_subscribers(&self, file_id: &str) -> Result<FileRecord> {
        self.subscriptions.get_subscribers(file_id).await
    }
}
