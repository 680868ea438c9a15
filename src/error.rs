use thiserror::Error;

/// Result type for AZM operations
pub type Result<T> = std::result::Result<T, AzmError>;

/// Errors that can occur when talking to an Atmosphere device
#[derive(Error, Debug)]
pub enum AzmError {
    /// Socket-level failure (connect refused, write failed, socket closed)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TCP connection establishment exceeded the configured timeout
    #[error("Connection timed out")]
    Timeout,

    /// A network operation was attempted while disconnected
    #[error("Not connected to device")]
    NotConnected,

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Inbound line or datagram was not valid UTF-8
    #[error("Invalid UTF-8 in message: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}
