//! Error types for the ingestion crate.

use thiserror::Error;
use timelines_common::TimelinesError;

/// Errors that can occur during ingestion.
#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Failed to read file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse CSV row {line}: {message}")]
    CsvParse { line: usize, message: String },

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Failed to store samples: {0}")]
    SampleStore(#[from] TimelinesError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestionError>;
