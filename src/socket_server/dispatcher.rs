//! Invalidation fan-out
//!
//! Pushes an invalidation to every subscriber that currently has a live
//! transport. Offline subscribers are skipped; a failed send is logged and
//! never affects the other recipients or the caller.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;

use crate::schema::ClientId;
use crate::socket_server::connection_registry::ConnectionRegistry;
use crate::socket_server::protocol::{Invalidation, ServerMessage};

/// Per-recipient outcome counts of one dispatch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: Vec<ClientId>,
    pub offline: Vec<ClientId>,
    pub failed: Vec<ClientId>,
}

enum Delivery {
    Delivered,
    Offline,
    Failed,
}

pub struct InvalidationDispatcher {
    registry: Arc<ConnectionRegistry>,
    send_timeout: Duration,
}

impl InvalidationDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>, send_timeout: Duration) -> Self {
        Self {
            registry,
            send_timeout,
        }
    }

    /// Send `{fileId, version}` to each live subscriber in `subscribers`
    pub async fn dispatch(&self, file_id: &str, version: u64, subscribers: &[ClientId]) -> DispatchReport {
        let invalidation = Invalidation::new(file_id, version);

        let sends = subscribers.iter().map(|client_id| {
            let msg = ServerMessage::Invalidate(invalidation.clone());
            async move {
                let Some(handle) = self.registry.lookup(client_id) else {
                    tracing::debug!("{} is offline, skipping {}@{}", client_id, file_id, version);
                    return (client_id, Delivery::Offline);
                };
                match handle.send(client_id, msg, self.send_timeout).await {
                    Ok(()) => (client_id, Delivery::Delivered),
                    Err(e) => {
                        tracing::warn!("{}", e);
                        (client_id, Delivery::Failed)
                    }
                }
            }
        });

        let mut report = DispatchReport::default();
        for (client_id, delivery) in join_all(sends).await {
            match delivery {
                Delivery::Delivered => report.delivered.push(client_id.clone()),
                Delivery::Offline => report.offline.push(client_id.clone()),
                Delivery::Failed => report.failed.push(client_id.clone()),
            }
        }

        tracing::info!(
            "Dispatched {}@{}: {} delivered, {} offline, {} failed",
            file_id,
            version,
            report.delivered.len(),
            report.offline.len(),
            report.failed.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn ids(list: &[&str]) -> Vec<ClientId> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_only_live_subscribers_receive() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, mut rx) = mpsc::channel(8);
        let _a = registry.register("A", tx).unwrap();

        let dispatcher = InvalidationDispatcher::new(registry, Duration::from_millis(100));
        let report = dispatcher.dispatch("F", 5, &ids(&["A", "B"])).await;

        assert_eq!(report.delivered, ids(&["A"]));
        assert_eq!(report.offline, ids(&["B"]));
        assert!(report.failed.is_empty());

        match rx.recv().await {
            Some(ServerMessage::Invalidate(inv)) => {
                assert_eq!(inv.file_id, "F");
                assert_eq!(inv.version, 5);
            }
            other => panic!("Expected invalidation, got {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stuck_transport_does_not_block_others() {
        let registry = Arc::new(ConnectionRegistry::new());

        // A's queue is already full and nobody drains it
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        slow_tx.try_send(ServerMessage::Pong).unwrap();
        let _a = registry.register("A", slow_tx).unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let _b = registry.register("B", tx).unwrap();

        let dispatcher = InvalidationDispatcher::new(registry, Duration::from_millis(20));
        let report = dispatcher.dispatch("F", 1, &ids(&["A", "B"])).await;

        assert_eq!(report.failed, ids(&["A"]));
        assert_eq!(report.delivered, ids(&["B"]));
        assert!(matches!(rx.recv().await, Some(ServerMessage::Invalidate(_))));
    }

    #[tokio::test]
    async fn test_all_offline_is_not_an_error() {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = InvalidationDispatcher::new(registry, Duration::from_millis(20));
        let report = dispatcher.dispatch("F", 2, &ids(&["A", "B"])).await;
        assert!(report.delivered.is_empty());
        assert_eq!(report.offline.len(), 2);
    }
}
