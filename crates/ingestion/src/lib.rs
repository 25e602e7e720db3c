//! Flux data ingestion.
//!
//! Turns the GOES XRS 1-minute average CSVs into [`FluxSample`]s and appends
//! them to the sample store the diagram source reads from. Also knows where
//! the monthly files are published.
//!
//! [`FluxSample`]: timelines_common::FluxSample

pub mod csv;
pub mod error;
pub mod goes;
mod ingester;

// Re-exports
pub use csv::{parse_goes_csv, CsvLayout, ParsedCsv};
pub use error::{IngestionError, Result};
pub use goes::{candidate_urls, new_avg_coverage, new_avg_url};
pub use ingester::{IngestOptions, Ingester, IngestionResult};
