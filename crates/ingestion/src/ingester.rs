//! Feeding parsed flux files into the sample store.

use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument};

use storage::SampleStore;

use crate::csv::{parse_goes_csv, CsvLayout};
use crate::error::Result;

/// Options for ingestion operations.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Keep samples at or after this instant
    pub start: DateTime<Utc>,
    /// Keep samples at or before this instant
    pub end: DateTime<Utc>,
    pub layout: CsvLayout,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            start: DateTime::<Utc>::MIN_UTC,
            end: DateTime::<Utc>::MAX_UTC,
            layout: CsvLayout::default(),
        }
    }
}

/// Result of an ingestion operation.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionResult {
    /// Where the data came from (path or URL)
    pub source: String,
    pub samples_stored: usize,
    pub rows_rejected: usize,
    pub rows_malformed: usize,
    /// Earliest and latest stored sample
    pub coverage: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

/// Parses flux CSVs and appends the accepted samples to a [`SampleStore`].
pub struct Ingester {
    samples: Arc<SampleStore>,
}

impl Ingester {
    pub fn new(samples: Arc<SampleStore>) -> Self {
        Self { samples }
    }

    /// Ingest a CSV file from the filesystem.
    pub async fn ingest_file(
        &self,
        path: impl AsRef<Path>,
        options: &IngestOptions,
    ) -> Result<IngestionResult> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        self.ingest_bytes(&data, &path.display().to_string(), options)
            .await
    }

    /// Ingest CSV content already in memory.
    ///
    /// Bytes that are not valid UTF-8 are replaced rather than rejected; the
    /// affected rows then fail to parse and are counted as malformed.
    #[instrument(skip(self, data, options), fields(source = %source, size = data.len()))]
    pub async fn ingest_bytes(
        &self,
        data: &[u8],
        source: &str,
        options: &IngestOptions,
    ) -> Result<IngestionResult> {
        let text = String::from_utf8_lossy(data);
        let parsed = parse_goes_csv(&text, &options.layout, options.start, options.end);

        let coverage = parsed
            .samples
            .iter()
            .map(|s| s.timestamp)
            .min()
            .zip(parsed.samples.iter().map(|s| s.timestamp).max());

        let stored = if parsed.samples.is_empty() {
            0
        } else {
            self.samples.append(&parsed.samples).await?
        };

        info!(
            stored,
            rejected = parsed.rejected,
            malformed = parsed.malformed,
            "Ingested flux samples"
        );

        Ok(IngestionResult {
            source: source.to_string(),
            samples_stored: stored,
            rows_rejected: parsed.rejected,
            rows_malformed: parsed.malformed,
            coverage,
        })
    }
}
