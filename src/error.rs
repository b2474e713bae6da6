//! Error types for the bridge engine.

use thiserror::Error;

/// Main error type for all bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Transport-level websocket failure (connect refused, handshake, I/O).
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Envelope serialization/deserialization error.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// The connect target could not be resolved to an endpoint.
    #[error("invalid connect target: {0}")]
    InvalidTarget(String),

    /// Operation attempted against a closed connection.
    #[error("connection closed")]
    Closed,

    /// `reply` called on a message that carried no reply address.
    #[error("message has no reply address")]
    NoReplyAddress,

    /// Outbound frame exceeds the configured transport limit.
    #[error("frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },
}

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;
