//! Error types for the Parlance voice engine

use thiserror::Error;

/// Result type alias for Parlance operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice engine
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error (fatal at component initialization)
    #[error("audio device error: {0}")]
    Device(String),

    /// Connection or transport error
    #[error("connection error: {0}")]
    Connection(String),

    /// Remote service rate limit
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Remote API error reported by the service
    #[error("api error: {0}")]
    Api(String),

    /// Input transcription failure reported by the service
    #[error("transcription error: {0}")]
    Transcription(String),

    /// WebSocket protocol error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
