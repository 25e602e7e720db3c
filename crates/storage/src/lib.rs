//! Storage for the diagram tile cache.
//!
//! - Tiles: filesystem store keyed by zoom level and start time
//! - Samples: monthly JSON files behind an LRU cache

pub mod sample_store;
pub mod tile_store;

pub use sample_store::{CacheStats as SampleCacheStats, SampleStore, DEFAULT_MONTH_CAPACITY};
pub use tile_store::{FsTileStore, TileStore};
