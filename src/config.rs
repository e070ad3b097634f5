//! Service configuration
//!
//! Loaded from an optional TOML file; a missing file means defaults. The
//! daemon binary layers CLI flags and environment variables on top.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3004
//!
//! [store]
//! backend = "sqlite"
//! path = "/var/lib/cache-invalidation/files.db"
//!
//! [dispatch]
//! send_timeout_ms = 2000
//! channel_capacity = 64
//!
//! [heartbeat]
//! interval_secs = 30
//! timeout_secs = 90
//!
//! [logging]
//! level = "info"
//! ```

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub dispatch: DispatchConfig,
    pub heartbeat: HeartbeatConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3004,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Database file; defaults to the platform data directory
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(default_store_path)
    }
}

/// `<data dir>/cache-invalidation/files.db`, falling back to the working directory
pub fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cache-invalidation")
        .join("files.db")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Upper bound on a single invalidation send
    pub send_timeout_ms: u64,
    /// Outbound queue depth per connection
    pub channel_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: 2000,
            channel_capacity: 64,
        }
    }
}

impl DispatchConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_secs: u64,
    /// Close the connection after this long without any inbound frame
    pub timeout_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            timeout_secs: 90,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a TOML file. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| ServiceError::Config {
            message: format!("Failed to parse {}: {}", path.display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(config_error("server.port must be non-zero"));
        }
        if self.dispatch.send_timeout_ms == 0 {
            return Err(config_error("dispatch.send_timeout_ms must be non-zero"));
        }
        if self.dispatch.channel_capacity == 0 {
            return Err(config_error("dispatch.channel_capacity must be non-zero"));
        }
        if self.heartbeat.interval_secs == 0 || self.heartbeat.timeout_secs == 0 {
            return Err(config_error("heartbeat interval and timeout must be non-zero"));
        }
        if self.heartbeat.timeout_secs < self.heartbeat.interval_secs {
            return Err(config_error(
                "heartbeat.timeout_secs must not be shorter than heartbeat.interval_secs",
            ));
        }
        if !["error", "warn", "info", "debug", "trace"].contains(&self.logging.level.as_str()) {
            return Err(config_error(&format!(
                "Invalid log level: {}. Must be one of: error, warn, info, debug, trace",
                self.logging.level
            )));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| ServiceError::Config {
                message: format!("Invalid listen address: {}", e),
            })
    }
}

fn config_error(message: &str) -> ServiceError {
    ServiceError::Config {
        message: message.to_string(),
    }
}
