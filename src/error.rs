//! Error handling for the replay station

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Camera source unreachable or misbehaving (handled by the supervisor)
    #[error("Source error: {0}")]
    Source(String),

    /// Not enough buffered frames for the requested window
    #[error("Buffer underrun for camera {camera_id}: {frames} frames buffered, {required} required")]
    BufferUnderrun {
        camera_id: String,
        frames: usize,
        required: usize,
    },

    /// Encoder failed; fatal for one clip, never retried
    #[error("Encode error: {0}")]
    Encode(String),

    /// Compression pass failed; caller falls back to the uncompressed artifact
    #[error("Compression error: {0}")]
    Compression(String),

    /// Precondition violated (unresolved placement, missing file, bad input)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Remote delivery failed; retried with backoff up to the configured cap
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// SQLx database error
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the scheduler should retry the delivery on a later cycle
    pub fn is_retryable_delivery(&self) -> bool {
        matches!(self, Error::Delivery(_) | Error::Http(_))
    }
}
