//! Error types for the timelines crates.

use thiserror::Error;

/// Result type alias using TimelinesError.
pub type TimelinesResult<T> = Result<T, TimelinesError>;

/// Primary error type for cache, storage and rendering operations.
///
/// A tile that simply does not exist is not an error: stores report it as
/// `Ok(None)`.
#[derive(Debug, Error)]
pub enum TimelinesError {
    // === Configuration Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid time specification: {0}")]
    InvalidTime(String),

    // === Data Errors ===
    #[error("Failed to read data: {0}")]
    DataReadError(String),

    #[error("Invalid tile metadata: {0}")]
    InvalidMetadata(String),

    // === Storage Errors ===
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    // === Rendering Errors ===
    #[error("Rendering failed: {0}")]
    RenderError(String),

    #[error("Failed to decode image: {0}")]
    DecodeError(String),

    #[error("Failed to compose tile: {0}")]
    ComposeError(String),

    // === Infrastructure Errors ===
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl TimelinesError {
    /// Whether the error means the store as a whole cannot be used.
    ///
    /// Only these abort a cache sweep; every other error is confined to the
    /// tile that produced it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TimelinesError::StorageUnavailable(_))
    }
}

// Conversion from common error types
impl From<std::io::Error> for TimelinesError {
    fn from(err: std::io::Error) -> Self {
        TimelinesError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for TimelinesError {
    fn from(err: serde_json::Error) -> Self {
        TimelinesError::DataReadError(format!("JSON error: {}", err))
    }
}
