//! Common test fixtures for cache tests.

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use image::{Rgba, RgbaImage};
use tempfile::TempDir;

use timelines_common::{TileGeometry, TileKey, TileMetadata};

/// Small tile size that keeps pixel work cheap: 100 px wide, so a level-0
/// tile spans 100 s.
pub const SMALL_GEOMETRY: TileGeometry = TileGeometry {
    width: 100,
    height: 20,
};

/// Colours used to tell tiles apart in assertions.
pub mod colors {
    use image::Rgba;

    pub const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    pub const GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);
    pub const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);
    pub const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);
}

/// The Unix epoch, used as dataset start in the small scenarios.
pub fn epoch() -> DateTime<Utc> {
    Utc.timestamp_millis_opt(0).unwrap()
}

/// Instant `secs` seconds after the epoch.
pub fn at_secs(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(secs * 1000).unwrap()
}

/// First instant of the averaged GOES archive.
pub fn archive_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1996, 8, 13, 20, 35, 16).unwrap()
}

pub fn solid_tile(geometry: &TileGeometry, color: Rgba<u8>) -> RgbaImage {
    RgbaImage::from_pixel(geometry.width, geometry.height, color)
}

/// A solid tile encoded the way the cache stores it, with metadata for `key`.
pub fn encoded_tile(key: &TileKey, geometry: &TileGeometry, color: Rgba<u8>) -> Bytes {
    let meta = TileMetadata::for_key(key, geometry).unwrap();
    Bytes::from(renderer::encode_tile(&solid_tile(geometry, color), &meta).unwrap())
}

/// Fresh temporary directory for a tile cache or sample store.
pub fn temp_cache_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("timelines-cache-")
        .tempdir()
        .unwrap()
}
