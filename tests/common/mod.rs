//! Common test utilities for cache-invalidation integration tests
//!
//! This module provides:
//! - `TestDaemon` which serves a `CacheService` on an ephemeral port
//! - `TestClient`, a thin JSON-over-WebSocket client with receive timeouts

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use cache_invalidation::socket_server::{serve, CacheService, ConnectionOptions, ConnectionRegistry};
use cache_invalidation::MemoryStore;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

pub struct TestDaemon {
    pub addr: SocketAddr,
    pub service: Arc<CacheService>,
    pub store: Arc<MemoryStore>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestDaemon {
    pub async fn start() -> Self {
        Self::start_with(ConnectionOptions {
            channel_capacity: 16,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            send_timeout: Duration::from_millis(500),
        })
        .await
    }

    pub async fn start_with(options: ConnectionOptions) -> Self {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let service = Arc::new(CacheService::new(
            store.clone(),
            registry,
            Duration::from_millis(500),
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let served = Arc::clone(&service);
        tokio::spawn(async move {
            serve(listener, served, options, async {
                let _ = shutdown_rx.await;
            })
            .await;
        });

        Self {
            addr,
            service,
            store,
            shutdown: Some(shutdown_tx),
        }
    }

    pub async fn client(&self) -> TestClient {
        TestClient::connect(self.addr).await
    }

    /// Connect a socket and bind it to `client_id`
    pub async fn connected_client(&self, client_id: &str) -> TestClient {
        let mut client = self.client().await;
        let reply = client
            .request(serde_json::json!({"type": "connect", "client_id": client_id}))
            .await;
        assert_eq!(reply["type"], "connected", "connect failed: {}", reply);
        client
    }

    /// Poll until the registry reflects `client_id`'s state
    pub async fn wait_until_connected(&self, client_id: &str, connected: bool) {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        while self.service.registry().is_connected(client_id) != connected {
            assert!(
                tokio::time::Instant::now() < deadline,
                "{} never became connected={}",
                client_id,
                connected
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for TestDaemon {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let (ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        Self { ws }
    }

    pub async fn send(&mut self, value: Value) {
        self.ws.send(Message::Text(value.to_string())).await.unwrap();
    }

    /// Next JSON text frame, skipping control frames
    pub async fn recv(&mut self) -> Option<Value> {
        loop {
            match tokio::time::timeout(RECV_TIMEOUT, self.ws.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => {
                    return Some(serde_json::from_str(&text).unwrap());
                }
                Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) | Ok(None) => return None,
                Ok(Some(Ok(_))) => continue,
                Err(_) => panic!("Timed out waiting for a message"),
            }
        }
    }

    pub async fn request(&mut self, value: Value) -> Value {
        self.send(value).await;
        self.recv().await.expect("connection closed before reply")
    }

    /// Assert no text frame arrives within `window`
    pub async fn expect_silence(&mut self, window: Duration) {
        loop {
            match tokio::time::timeout(window, self.ws.next()).await {
                Err(_) => return,
                Ok(Some(Ok(Message::Text(text)))) => panic!("Unexpected message: {}", text),
                Ok(Some(Ok(_))) => continue,
                Ok(_) => return,
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
