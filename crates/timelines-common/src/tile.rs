//! Tile keys, zoom levels and time windows of the diagram cache.
//!
//! A tile at zoom level `L` covers `image_width × 2^L` seconds: each pixel
//! column stands for `2^L` seconds, so every level doubles the time span of
//! the one below it. Tiles of one level abut without overlap, starting at the
//! dataset start instant.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::RangeInclusive;

use crate::error::{TimelinesError, TimelinesResult};
use crate::time::{format_metadata_date, from_epoch_millis, parse_metadata_date};

/// Zoom level index. Larger is coarser.
pub type ZoomLevel = u32;

/// Metadata key holding the zoom level.
pub const META_ZOOM_LEVEL: &str = "zoomLevel";
/// Metadata key holding the tile start.
pub const META_START_DATE: &str = "startDate";
/// Metadata key holding the tile end.
pub const META_END_DATE: &str = "endDate";

/// Closed interval of cached zoom levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoomRange {
    /// Finest cached level, rendered directly from samples
    pub min: ZoomLevel,
    /// Coarsest cached level
    pub max: ZoomLevel,
}

impl ZoomRange {
    pub fn new(min: ZoomLevel, max: ZoomLevel) -> TimelinesResult<Self> {
        if min > max {
            return Err(TimelinesError::InvalidConfig(format!(
                "zoom_min ({}) must not exceed zoom_max ({})",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    /// Levels in build order, finest first.
    pub fn levels(&self) -> RangeInclusive<ZoomLevel> {
        self.min..=self.max
    }

    pub fn contains(&self, level: ZoomLevel) -> bool {
        self.levels().contains(&level)
    }

    /// Whether tiles at `level` come straight from the diagram source.
    pub fn is_base(&self, level: ZoomLevel) -> bool {
        level == self.min
    }

    /// Number of level steps between the finest and coarsest level.
    pub fn span(&self) -> u32 {
        self.max - self.min
    }
}

/// Pixel size shared by every tile of the pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileGeometry {
    pub width: u32,
    pub height: u32,
}

impl TileGeometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Time covered by one tile at `level`, in milliseconds.
    ///
    /// Returns `None` when the span does not fit in an `i64`.
    pub fn checked_duration_ms(&self, level: ZoomLevel) -> Option<i64> {
        2i64.checked_pow(level)?
            .checked_mul(self.width as i64)?
            .checked_mul(1000)
    }

    /// Time covered by one tile at `level`, in milliseconds (saturating).
    pub fn duration_ms(&self, level: ZoomLevel) -> i64 {
        self.checked_duration_ms(level).unwrap_or(i64::MAX)
    }

    /// Time covered by one tile at `level`.
    pub fn duration(&self, level: ZoomLevel) -> Duration {
        Duration::milliseconds(self.duration_ms(level))
    }
}

/// A half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, dt: &DateTime<Utc>) -> bool {
        dt >= &self.start && dt < &self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// The window has not fully elapsed at `now`, so data may still arrive.
    pub fn is_provisional(&self, now: &DateTime<Utc>) -> bool {
        &self.end > now
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Identifies one cached tile: zoom level plus start instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileKey {
    pub level: ZoomLevel,
    /// Tile start in epoch milliseconds
    pub start_ms: i64,
}

impl TileKey {
    pub fn new(level: ZoomLevel, start: DateTime<Utc>) -> Self {
        Self {
            level,
            start_ms: start.timestamp_millis(),
        }
    }

    pub fn from_millis(level: ZoomLevel, start_ms: i64) -> Self {
        Self { level, start_ms }
    }

    pub fn start(&self) -> TimelinesResult<DateTime<Utc>> {
        from_epoch_millis(self.start_ms)
    }

    pub fn end_ms(&self, geometry: &TileGeometry) -> i64 {
        self.start_ms.saturating_add(geometry.duration_ms(self.level))
    }

    pub fn window(&self, geometry: &TileGeometry) -> TimelinesResult<TimeWindow> {
        Ok(TimeWindow::new(
            self.start()?,
            from_epoch_millis(self.end_ms(geometry))?,
        ))
    }

    /// The tile that follows this one at the same level.
    pub fn next(&self, geometry: &TileGeometry) -> TileKey {
        TileKey::from_millis(self.level, self.end_ms(geometry))
    }

    /// The two tiles one level below covering the same span, left then right.
    pub fn sources(&self, geometry: &TileGeometry) -> Option<(TileKey, TileKey)> {
        let level = self.level.checked_sub(1)?;
        let left = TileKey::from_millis(level, self.start_ms);
        let right = left.next(geometry);
        Some((left, right))
    }

    /// File name of the tile inside its level directory.
    pub fn file_name(&self) -> String {
        format!("{}.png", self.start_ms)
    }

    /// Path of the tile relative to the cache root.
    /// Format: {level}/{start_ms}.png
    pub fn relative_path(&self) -> String {
        format!("{}/{}", self.level, self.file_name())
    }

    /// Recover the start time from a tile file name such as `839961316000.png`.
    pub fn parse_file_name(level: ZoomLevel, file_name: &str) -> Option<TileKey> {
        let stem = file_name.split('.').next()?;
        stem.parse::<i64>().ok().map(|ms| TileKey::from_millis(level, ms))
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.level, self.start_ms)
    }
}

/// Metadata embedded in every tile for downstream consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileMetadata {
    pub zoom_level: ZoomLevel,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TileMetadata {
    pub fn new(zoom_level: ZoomLevel, window: TimeWindow) -> Self {
        Self {
            zoom_level,
            start: window.start,
            end: window.end,
        }
    }

    pub fn for_key(key: &TileKey, geometry: &TileGeometry) -> TimelinesResult<Self> {
        Ok(Self::new(key.level, key.window(geometry)?))
    }

    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.start, self.end)
    }

    /// Key/value pairs as written into the image container.
    pub fn to_text_entries(&self) -> Vec<(String, String)> {
        vec![
            (META_ZOOM_LEVEL.to_string(), self.zoom_level.to_string()),
            (META_START_DATE.to_string(), format_metadata_date(&self.start)),
            (META_END_DATE.to_string(), format_metadata_date(&self.end)),
        ]
    }

    pub fn from_text_entries(entries: &HashMap<String, String>) -> TimelinesResult<Self> {
        let get = |key: &str| {
            entries
                .get(key)
                .ok_or_else(|| TimelinesError::InvalidMetadata(format!("missing '{}'", key)))
        };

        let zoom_level = get(META_ZOOM_LEVEL)?
            .parse::<ZoomLevel>()
            .map_err(|e| TimelinesError::InvalidMetadata(format!("bad zoomLevel: {}", e)))?;

        Ok(Self {
            zoom_level,
            start: parse_metadata_date(get(META_START_DATE)?)?,
            end: parse_metadata_date(get(META_END_DATE)?)?,
        })
    }
}
