//! Cache Invalidation Daemon Binary
//!
//! A WebSocket server that tracks file subscriptions and pushes
//! invalidations to connected clients.
//!
//! # Usage
//!
//! ```bash
//! cache-invalidation-daemon --port 3004
//! cache-invalidation-daemon --config /etc/cache-invalidation.toml --store memory
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use cache_invalidation::socket_server::{serve, CacheService, ConnectionOptions, ConnectionRegistry};
use cache_invalidation::store::open_store;
use cache_invalidation::{ServiceConfig, StoreBackend};

/// Cache Invalidation Daemon
#[derive(Parser, Debug)]
#[command(name = "cache-invalidation-daemon")]
#[command(about = "Pushes cache invalidations to subscribed clients over WebSocket")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "CACHE_INVALIDATION_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "CACHE_INVALIDATION_PORT")]
    port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "CACHE_INVALIDATION_HOST")]
    host: Option<String>,

    /// Subscription record backend
    #[arg(long, value_enum, env = "CACHE_INVALIDATION_STORE")]
    store: Option<StoreBackend>,

    /// SQLite database path
    #[arg(long, env = "CACHE_INVALIDATION_DB")]
    db_path: Option<PathBuf>,

    /// Per-send timeout for invalidations, in milliseconds
    #[arg(long, env = "CACHE_INVALIDATION_SEND_TIMEOUT_MS")]
    send_timeout_ms: Option<u64>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "CACHE_INVALIDATION_LOG")]
    log_level: Option<String>,
}

impl Args {
    fn into_config(self) -> cache_invalidation::Result<ServiceConfig> {
        let mut config = match &self.config {
            Some(path) => ServiceConfig::load_from(path)?,
            None => ServiceConfig::default(),
        };

        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(backend) = self.store {
            config.store.backend = backend;
        }
        if let Some(path) = self.db_path {
            config.store.path = Some(path);
        }
        if let Some(ms) = self.send_timeout_ms {
            config.dispatch.send_timeout_ms = ms;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config()?;

    // Initialize logging
    let level = &config.logging.level;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "cache_invalidation={},cache_invalidation_daemon={}",
                level, level
            ))
        }))
        .init();

    let addr = config.listen_addr()?;
    let store = open_store(&config.store)?;
    let registry = Arc::new(ConnectionRegistry::new());
    let service = Arc::new(CacheService::new(
        store,
        registry,
        config.dispatch.send_timeout(),
    ));

    // Start the TCP listener
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Cache invalidation daemon listening on ws://{}", addr);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    };
    serve(listener, service, ConnectionOptions::from_config(&config), shutdown).await;

    Ok(())
}
