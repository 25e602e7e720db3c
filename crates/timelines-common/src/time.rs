//! Time handling utilities for flux data and cache tiles.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::error::{TimelinesError, TimelinesResult};

/// Date format used for the `startDate`/`endDate` entries embedded in tiles.
pub const METADATA_DATE_FORMAT: &str = "%Y-%m-%d:%H:%M:%S";

/// Convert epoch milliseconds to a UTC instant.
pub fn from_epoch_millis(millis: i64) -> TimelinesResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| TimelinesError::InvalidTime(format!("epoch millis out of range: {}", millis)))
}

/// Parse an instant given on the command line or in configuration.
///
/// Supports:
/// - RFC 3339: "1996-08-13T20:35:16Z"
/// - Naive datetime (assumed UTC): "1996-08-13T20:35:16"
/// - Date only: "1996-08-13"
/// - Epoch milliseconds: "839961316000"
pub fn parse_instant(s: &str) -> TimelinesResult<DateTime<Utc>> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(ndt) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit() || b == b'-') {
        if let Ok(millis) = s.parse::<i64>() {
            return from_epoch_millis(millis);
        }
    }

    Err(TimelinesError::InvalidTime(s.to_string()))
}

/// Format an instant for embedding in tile metadata.
pub fn format_metadata_date(dt: &DateTime<Utc>) -> String {
    dt.format(METADATA_DATE_FORMAT).to_string()
}

/// Parse a `startDate`/`endDate` value read back from a tile.
pub fn parse_metadata_date(s: &str) -> TimelinesResult<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, METADATA_DATE_FORMAT)
        .map(|ndt| Utc.from_utc_datetime(&ndt))
        .map_err(|e| TimelinesError::InvalidMetadata(format!("bad date '{}': {}", s, e)))
}

/// Midnight of the first day of the month containing `dt`.
pub fn first_day_of_month(dt: &DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(dt.year(), dt.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(*dt)
}

/// Midnight of the first day of the month after the one containing `dt`.
pub fn first_day_of_next_month(dt: &DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if dt.month() == 12 {
        (dt.year() + 1, 1)
    } else {
        (dt.year(), dt.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .unwrap_or(*dt)
}

/// Midnight of the last day of the month containing `dt`.
pub fn last_day_of_month(dt: &DateTime<Utc>) -> DateTime<Utc> {
    first_day_of_next_month(dt) - Duration::days(1)
}
