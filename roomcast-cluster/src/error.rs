//! Error types for the backplane

use roomcast_core::models::ConnectionId;
use thiserror::Error;

/// Backplane error types
#[derive(Debug, Error)]
pub enum Error {
    /// The connection id is unknown or already disconnected
    #[error("Connection not connected: {0}")]
    NotConnected(ConnectionId),

    /// The cross-node relay cannot take the request right now
    #[error("Relay unavailable: {0}")]
    RelayUnavailable(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for backplane operations
pub type Result<T> = std::result::Result<T, Error>;
