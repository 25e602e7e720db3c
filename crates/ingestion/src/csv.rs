//! GOES XRS CSV parsing.
//!
//! The averaged files open with a free-form header that ends in a line
//! reading `data:`, followed by a column header and one row per minute:
//!
//! ```text
//! data:
//! time_tag,xs,xl
//! 1999-05-03 00:00:00.000,1.2300e-08,4.5600e-07
//! ```

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::{debug, warn};

use timelines_common::sample::sanitize_flux;
use timelines_common::FluxSample;

use crate::error::{IngestionError, Result};

/// Line that separates the file header from the data section.
pub const DATA_MARKER: &str = "data:";

/// Column layout of a flux CSV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvLayout {
    pub timestamp_column: usize,
    /// 0.05-0.4 nm channel
    pub low_channel_column: usize,
    /// 0.1-0.8 nm channel
    pub high_channel_column: usize,
    /// chrono format of the timestamp column, interpreted as UTC
    pub timestamp_format: String,
}

impl Default for CsvLayout {
    /// `time_tag, xs, xl` as published in the 1-minute averages.
    fn default() -> Self {
        Self {
            timestamp_column: 0,
            low_channel_column: 1,
            high_channel_column: 2,
            timestamp_format: "%Y-%m-%d %H:%M:%S%.3f".to_string(),
        }
    }
}

/// Outcome of parsing one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedCsv {
    /// Accepted samples in file order
    pub samples: Vec<FluxSample>,
    /// Rows that parsed but were out of range or outside the interval
    pub rejected: usize,
    /// Rows that could not be parsed
    pub malformed: usize,
}

/// Parse `text`, keeping samples with `start <= timestamp <= end`.
///
/// Channel values outside `[1e-10, 1e-2]` are replaced by zero, which in
/// turn disqualifies the row.
pub fn parse_goes_csv(
    text: &str,
    layout: &CsvLayout,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> ParsedCsv {
    let mut parsed = ParsedCsv::default();

    for (line_no, line) in data_lines(text) {
        let sample = match parse_row(line, line_no, layout) {
            Ok(sample) => sample,
            Err(e) => {
                warn!(error = %e, "Skipping malformed row");
                parsed.malformed += 1;
                continue;
            }
        };

        if sample.is_valid() && sample.timestamp >= start && sample.timestamp <= end {
            parsed.samples.push(sample);
        } else {
            parsed.rejected += 1;
        }
    }

    debug!(
        accepted = parsed.samples.len(),
        rejected = parsed.rejected,
        malformed = parsed.malformed,
        "Parsed flux CSV"
    );
    parsed
}

/// Parse a single data row.
pub fn parse_row(line: &str, line_no: usize, layout: &CsvLayout) -> Result<FluxSample> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let field = |column: usize, name: &str| {
        fields.get(column).copied().ok_or_else(|| IngestionError::CsvParse {
            line: line_no,
            message: format!("missing {} column {}", name, column),
        })
    };

    let raw_time = field(layout.timestamp_column, "timestamp")?;
    let timestamp = NaiveDateTime::parse_from_str(raw_time, &layout.timestamp_format)
        .map(|ndt| Utc.from_utc_datetime(&ndt))
        .map_err(|e| IngestionError::CsvParse {
            line: line_no,
            message: format!("bad timestamp '{}': {}", raw_time, e),
        })?;

    let channel = |column: usize, name: &str| -> Result<f32> {
        let raw = field(column, name)?;
        raw.parse::<f32>().map_err(|e| IngestionError::CsvParse {
            line: line_no,
            message: format!("bad {} value '{}': {}", name, raw, e),
        })
    };

    let low = channel(layout.low_channel_column, "low channel")?;
    let high = channel(layout.high_channel_column, "high channel")?;

    Ok(FluxSample::new(timestamp, sanitize_flux(low), sanitize_flux(high)))
}

/// Numbered rows after the header, skipping blanks.
///
/// Everything up to and including the `data:` marker and the column header
/// after it is dropped. Files without a marker lose only their first line.
fn data_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    let lines: Vec<(usize, &str)> = text
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line))
        .collect();

    let skip = lines
        .iter()
        .position(|(_, line)| line.trim() == DATA_MARKER)
        .map_or(1, |marker| marker + 2);

    lines
        .into_iter()
        .skip(skip)
        .filter(|(_, line)| !line.trim().is_empty())
}
