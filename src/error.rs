//! Error types for the cache invalidation service

use thiserror::Error;

/// Main error type for registry, store and dispatch operations
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Client {client_id} is already connected")]
    AlreadyConnected { client_id: String },

    #[error("Client {client_id} has no live connection")]
    NoLiveConnection { client_id: String },

    #[error("File not found: {file_id}")]
    FileNotFound { file_id: String },

    #[error("Persistence failure: {message}")]
    PersistenceFailure { message: String },

    #[error("Failed to send to client {client_id}: {message}")]
    TransportSendFailure { client_id: String, message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// Stable machine-readable code used in protocol error frames
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyConnected { .. } => "already_connected",
            Self::NoLiveConnection { .. } => "not_connected",
            Self::FileNotFound { .. } => "file_not_found",
            Self::PersistenceFailure { .. } => "persistence_failure",
            Self::TransportSendFailure { .. } => "transport_send_failure",
            Self::Config { .. } => "config_error",
            Self::Io(_) => "io_error",
        }
    }

    pub(crate) fn persistence(err: impl std::fmt::Display) -> Self {
        Self::PersistenceFailure {
            message: err.to_string(),
        }
    }
}

impl From<rusqlite::Error> for ServiceError {
    fn from(err: rusqlite::Error) -> Self {
        Self::persistence(err)
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        Self::persistence(err)
    }
}

/// Result type alias for service operations
pub type Result<T> = std::result::Result<T, ServiceError>;
