//! Common types and utilities shared across the timelines crates.

pub mod error;
pub mod sample;
pub mod tile;
pub mod time;

pub use error::{TimelinesError, TimelinesResult};
pub use sample::{FluxSample, FLUX_MAX, FLUX_MIN};
pub use tile::{TileGeometry, TileKey, TileMetadata, TimeWindow, ZoomLevel, ZoomRange};
pub use time::{format_metadata_date, parse_instant, parse_metadata_date};
