//! WebSocket connection handler
//!
//! One task per connection reads client frames and routes them to the
//! service; a companion writer task drains the connection's outbound queue
//! into the socket and sends heartbeat pings.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{accept_async, WebSocketStream};

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::socket_server::connection_registry::{Registration, Transport};
use crate::socket_server::protocol::{ClientMessage, ServerMessage};
use crate::socket_server::service::CacheService;

/// Per-connection tunables
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub channel_capacity: usize,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    /// How long a reply may wait for room in the outbound queue
    pub send_timeout: Duration,
}

impl ConnectionOptions {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            channel_capacity: config.dispatch.channel_capacity,
            heartbeat_interval: config.heartbeat.interval(),
            heartbeat_timeout: config.heartbeat.timeout(),
            send_timeout: config.dispatch.send_timeout(),
        }
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::from_config(&ServiceConfig::default())
    }
}

/// Accept connections until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    service: Arc<CacheService>,
    options: ConnectionOptions,
    shutdown: impl Future<Output = ()>,
) {
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    tracing::debug!("Accepted connection from {}", addr);
                    let service = Arc::clone(&service);
                    let options = options.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, service, options).await;
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept connection: {}", e);
                }
            },
            _ = &mut shutdown => {
                tracing::info!("Shutting down listener");
                break;
            }
        }
    }
}

/// Handle a single WebSocket connection
pub async fn handle_connection(stream: TcpStream, service: Arc<CacheService>, options: ConnectionOptions) {
    let addr = stream.peer_addr().ok();
    tracing::info!("New connection from {:?}", addr);

    // Accept WebSocket handshake
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::error!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    let (sink, stream) = ws_stream.split();
    let (outbound, outbound_rx) = mpsc::channel(options.channel_capacity);
    let writer = tokio::spawn(write_loop(sink, outbound_rx, options.heartbeat_interval));

    let mut conn = ConnectionState::new(stream, outbound, service, addr, &options);
    conn.run().await;

    // Dropping the state releases the registration and the last local sender,
    // which ends the writer.
    drop(conn);
    let _ = writer.await;

    tracing::info!("Connection closed from {:?}", addr);
}

/// Drain the outbound queue into the socket, pinging on every tick
async fn write_loop(
    mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut outbound_rx: mpsc::Receiver<ServerMessage>,
    heartbeat_interval: Duration,
) {
    let mut heartbeat = tokio::time::interval_at(Instant::now() + heartbeat_interval, heartbeat_interval);

    loop {
        tokio::select! {
            msg = outbound_rx.recv() => {
                let Some(msg) = msg else { break };
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!("Failed to encode outbound message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(json)).await {
                    tracing::warn!("WebSocket write failed: {}", e);
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                    tracing::warn!("Heartbeat ping failed: {}", e);
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
}

/// Whether the read loop keeps going after a message
enum Flow {
    Continue,
    Close,
}

/// State for a single connection
struct ConnectionState<S> {
    stream: S,
    outbound: Transport,
    service: Arc<CacheService>,
    /// Present once the client has bound its identity
    registration: Option<Registration>,
    addr: Option<SocketAddr>,
    heartbeat_timeout: Duration,
    send_timeout: Duration,
    /// Set when a reply could not be queued; the client is not reading
    stalled: bool,
}

impl<S> ConnectionState<S>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    fn new(
        stream: S,
        outbound: Transport,
        service: Arc<CacheService>,
        addr: Option<SocketAddr>,
        options: &ConnectionOptions,
    ) -> Self {
        Self {
            stream,
            outbound,
            service,
            registration: None,
            addr,
            heartbeat_timeout: options.heartbeat_timeout,
            send_timeout: options.send_timeout,
            stalled: false,
        }
    }

    async fn run(&mut self) {
        let mut last_seen = Instant::now();

        loop {
            let deadline = last_seen + self.heartbeat_timeout;
            tokio::select! {
                msg = self.stream.next() => {
                    last_seen = Instant::now();
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Flow::Close = self.handle_message(&text).await {
                                break;
                            }
                            if self.stalled {
                                tracing::warn!("Outbound queue for {} is stuck, closing", self.label());
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("Client {} requested close", self.label());
                            break;
                        }
                        Some(Err(e)) => {
                            tracing::error!("WebSocket error from {}: {}", self.label(), e);
                            break;
                        }
                        None => break,
                        // Pings are answered by tungstenite; pongs only refresh last_seen
                        _ => {}
                    }
                }

                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!("Heartbeat timeout for {}, closing", self.label());
                    break;
                }

                _ = self.outbound.closed() => {
                    tracing::debug!("Writer for {} ended", self.label());
                    break;
                }
            }
        }

        // Deregister before anything else can observe this transport
        self.registration.take();
    }

    fn label(&self) -> String {
        match &self.registration {
            Some(reg) => reg.client_id().to_string(),
            None => format!("{:?}", self.addr),
        }
    }

    async fn handle_message(&mut self, text: &str) -> Flow {
        let msg: ClientMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!("Malformed message from {}: {}", self.label(), e);
                self.send_error("bad_request", &format!("Malformed message: {}", e)).await;
                return Flow::Continue;
            }
        };
        tracing::debug!("{} -> {:?}", self.label(), msg);

        match msg {
            ClientMessage::Connect { client_id } => return self.handle_connect(client_id).await,

            ClientMessage::Subscribe { file_id } => {
                if let Some(client_id) = self.bound_client().await {
                    let ack = self.service.on_subscribe(&client_id, &file_id).await;
                    self.send(ServerMessage::Ack(ack)).await;
                }
            }

            ClientMessage::Unsubscribe { file_id } => {
                if let Some(client_id) = self.bound_client().await {
                    let ack = self.service.on_unsubscribe(&client_id, &file_id).await;
                    self.send(ServerMessage::Ack(ack)).await;
                }
            }

            ClientMessage::Notify { file_id, version } => {
                let ack = self.service.on_file_updated(&file_id, version).await;
                self.send(ServerMessage::Ack(ack)).await;
            }

            ClientMessage::Query { file_id } => {
                match self.service.on_query_subscribers(&file_id).await {
                    Ok(record) => self.send(ServerMessage::Subscribers { record }).await,
                    Err(e) => self.send_error(e.code(), &e.to_string()).await,
                }
            }

            ClientMessage::Ping => self.send(ServerMessage::Pong).await,
        }

        Flow::Continue
    }

    async fn handle_connect(&mut self, client_id: String) -> Flow {
        if let Some(reg) = &self.registration {
            let message = format!("Socket is already bound to {}", reg.client_id());
            self.send_error("bad_request", &message).await;
            return Flow::Continue;
        }

        match self.service.on_connect(&client_id, self.outbound.clone()) {
            Ok(registration) => {
                let connected = ServerMessage::Connected {
                    client_id,
                    connection_id: registration.connection_id().to_string(),
                };
                self.registration = Some(registration);
                self.send(connected).await;
                Flow::Continue
            }
            Err(e @ ServiceError::AlreadyConnected { .. }) => {
                tracing::warn!("Rejected duplicate connection from {:?}: {}", self.addr, e);
                self.send_error(e.code(), &e.to_string()).await;
                Flow::Close
            }
            Err(e) => {
                self.send_error(e.code(), &e.to_string()).await;
                Flow::Close
            }
        }
    }

    /// Identity bound to this socket, or an error frame to the client
    async fn bound_client(&mut self) -> Option<String> {
        if let Some(reg) = &self.registration {
            return Some(reg.client_id().to_string());
        }
        self.send_error("not_connected", "Send a connect message before subscribing")
            .await;
        None
    }

    async fn send(&mut self, msg: ServerMessage) {
        match self.outbound.send_timeout(msg, self.send_timeout).await {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                tracing::debug!("Reply to {} timed out after {:?}", self.label(), self.send_timeout);
                self.stalled = true;
            }
            Err(SendTimeoutError::Closed(_)) => {
                tracing::debug!("Outbound queue for {} is closed", self.label());
                self.stalled = true;
            }
        }
    }

    async fn send_error(&mut self, code: &str, message: &str) {
        self.send(ServerMessage::Error {
            code: code.to_string(),
            message: message.to_string(),
        })
        .await;
    }
}
