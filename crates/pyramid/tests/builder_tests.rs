//! End-to-end tests for building and extending the pyramid.

use async_trait::async_trait;
use bytes::Bytes;
use image::{Rgba, RgbaImage};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pyramid::{DiagramSource, PyramidBuilder, PyramidConfig};
use storage::{FsTileStore, TileStore};
use test_utils::colors::{BLUE, RED, TRANSPARENT};
use test_utils::{at_secs, encoded_tile, epoch, solid_tile, temp_cache_dir, InMemoryTileStore, SMALL_GEOMETRY};
use timelines_common::{TileKey, TileMetadata, TimeWindow, TimelinesError, TimelinesResult};

// ============================================================================
// Helpers
// ============================================================================

/// Renders every window as one solid colour; chosen windows fail.
struct ColorSource {
    color: Mutex<Rgba<u8>>,
    failing: HashSet<i64>,
    calls: AtomicUsize,
}

impl ColorSource {
    fn new(color: Rgba<u8>) -> Self {
        Self {
            color: Mutex::new(color),
            failing: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    fn failing_at(color: Rgba<u8>, starts_secs: &[i64]) -> Self {
        Self {
            failing: starts_secs.iter().map(|s| s * 1000).collect(),
            ..Self::new(color)
        }
    }

    fn set_color(&self, color: Rgba<u8>) {
        *self.color.lock().unwrap() = color;
    }
}

#[async_trait]
impl DiagramSource for ColorSource {
    async fn render(&self, window: TimeWindow) -> TimelinesResult<RgbaImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&window.start.timestamp_millis()) {
            return Err(TimelinesError::RenderError("no samples readable".into()));
        }
        let color = *self.color.lock().unwrap();
        Ok(solid_tile(&SMALL_GEOMETRY, color))
    }
}

/// Levels 0..=1 with 100 px tiles: 100 s per base tile, 200 s one level up.
fn config() -> PyramidConfig {
    PyramidConfig {
        zoom_min: 0,
        zoom_max: 1,
        image_width: SMALL_GEOMETRY.width,
        image_height: SMALL_GEOMETRY.height,
        dataset_start: epoch(),
        ..Default::default()
    }
}

fn builder(
    config: &PyramidConfig,
    store: Arc<dyn TileStore>,
    source: Arc<dyn DiagramSource>,
) -> PyramidBuilder {
    PyramidBuilder::new(config, store, source).unwrap()
}

fn key(level: u32, secs: i64) -> TileKey {
    TileKey::from_millis(level, secs * 1000)
}

async fn decoded(store: &InMemoryTileStore, key: TileKey) -> (RgbaImage, TileMetadata) {
    let bytes = store.get(&key).await.expect("tile should exist");
    renderer::decode_tile(&bytes).unwrap()
}

fn starts(keys: Vec<TileKey>) -> Vec<i64> {
    keys.into_iter().map(|k| k.start_ms / 1000).collect()
}

// ============================================================================
// Full build
// ============================================================================

#[tokio::test]
async fn test_create_cache_concrete_scenario() {
    let store = Arc::new(InMemoryTileStore::new());
    let source = Arc::new(ColorSource::new(RED));
    let builder = builder(&config(), store.clone(), source.clone());

    let report = builder.create_cache_at(at_secs(250)).await.unwrap();

    // the window [200, 300) is built although it ends after now
    assert_eq!(starts(store.keys_at(0).await), vec![0, 100, 200]);
    assert_eq!(starts(store.keys_at(1).await), vec![0, 200]);
    assert_eq!(source.calls.load(Ordering::SeqCst), 3);

    let base = report.level(0).unwrap();
    assert_eq!((base.written, base.skipped, base.failed), (3, 0, 0));
    assert_eq!(base.frontier, Some(at_secs(200)));
    let upper = report.level(1).unwrap();
    assert_eq!((upper.written, upper.skipped, upper.failed), (2, 0, 0));
    assert_eq!(upper.frontier, Some(at_secs(200)));
    assert_eq!(report.now, at_secs(250));

    // [0, 200) from two red tiles
    let (image, meta) = decoded(&store, key(1, 0)).await;
    assert_eq!(image.dimensions(), (100, 20));
    assert_eq!(*image.get_pixel(0, 10), RED);
    assert_eq!(*image.get_pixel(99, 10), RED);
    assert_eq!((meta.zoom_level, meta.start, meta.end), (1, at_secs(0), at_secs(200)));

    // [200, 400): right half lies in the future and stays transparent
    let (image, meta) = decoded(&store, key(1, 200)).await;
    assert_eq!(*image.get_pixel(0, 10), RED);
    assert_eq!(image.get_pixel(99, 10)[3], 0);
    assert_eq!(meta.end, at_secs(400));
}

#[tokio::test]
async fn test_base_tiles_carry_metadata() {
    let store = Arc::new(InMemoryTileStore::new());
    let builder = builder(&config(), store.clone(), Arc::new(ColorSource::new(BLUE)));
    builder.create_cache_at(at_secs(150)).await.unwrap();

    let (image, meta) = decoded(&store, key(0, 100)).await;
    assert_eq!(*image.get_pixel(50, 5), BLUE);
    assert_eq!((meta.zoom_level, meta.start, meta.end), (0, at_secs(100), at_secs(200)));
}

#[tokio::test]
async fn test_nothing_built_before_dataset_start() {
    let store = Arc::new(InMemoryTileStore::new());
    let builder = builder(&config(), store.clone(), Arc::new(ColorSource::new(RED)));

    let report = builder.create_cache_at(epoch()).await.unwrap();
    assert_eq!(report.written(), 0);
    assert!(report.levels.iter().all(|l| l.frontier.is_none()));
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn test_gap_below_leaves_gap_above() {
    let store = Arc::new(InMemoryTileStore::new());
    let source = Arc::new(ColorSource::failing_at(RED, &[200]));
    let builder = builder(&config(), store.clone(), source);

    let report = builder.create_cache_at(at_secs(450)).await.unwrap();

    let base = report.level(0).unwrap();
    assert_eq!((base.written, base.failed), (4, 1));
    assert_eq!(starts(store.keys_at(0).await), vec![0, 100, 300, 400]);

    // [200, 400) has no left source; [400, 600) is still built afterwards
    let upper = report.level(1).unwrap();
    assert_eq!((upper.written, upper.skipped, upper.failed), (2, 1, 0));
    assert_eq!(starts(store.keys_at(1).await), vec![0, 400]);
}

#[tokio::test]
async fn test_missing_right_source_in_the_past_is_padded() {
    let store = Arc::new(InMemoryTileStore::new());
    let source = Arc::new(ColorSource::failing_at(RED, &[100]));
    let builder = builder(&config(), store.clone(), source);

    builder.create_cache_at(at_secs(250)).await.unwrap();

    let (image, _) = decoded(&store, key(1, 0)).await;
    assert_eq!(*image.get_pixel(0, 10), RED);
    assert_eq!(*image.get_pixel(99, 10), TRANSPARENT);
}

#[tokio::test]
async fn test_alpha_override_applies_to_composed_tiles() {
    let store = Arc::new(InMemoryTileStore::new());
    let config = PyramidConfig {
        alpha_factor: Some(0.5),
        ..config()
    };
    let builder = builder(&config, store.clone(), Arc::new(ColorSource::new(RED)));
    builder.create_cache_at(at_secs(400)).await.unwrap();

    let (base, _) = decoded(&store, key(0, 0)).await;
    let (upper, _) = decoded(&store, key(1, 0)).await;
    assert_eq!(base.get_pixel(0, 0)[3], 255);
    assert_eq!(upper.get_pixel(0, 0)[3], 128);
}

// ============================================================================
// Failure handling
// ============================================================================

#[tokio::test]
async fn test_write_failure_does_not_stop_level() {
    let store = Arc::new(InMemoryTileStore::new());
    store.fail_writes_of(key(0, 100)).await;
    let builder = builder(&config(), store.clone(), Arc::new(ColorSource::new(RED)));

    let report = builder.create_cache_at(at_secs(250)).await.unwrap();
    let base = report.level(0).unwrap();
    assert_eq!((base.written, base.failed), (2, 1));
    assert_eq!(starts(store.keys_at(0).await), vec![0, 200]);
}

#[tokio::test]
async fn test_corrupt_source_tile_fails_only_its_parent() {
    let store = Arc::new(InMemoryTileStore::new());
    store.insert(key(0, 100), Bytes::from_static(b"not a png")).await;
    // the base render fails too, so the corrupt bytes stay in place
    let source = Arc::new(ColorSource::failing_at(RED, &[100]));
    let builder = builder(&config(), store.clone(), source);

    let report = builder.create_cache_at(at_secs(250)).await.unwrap();

    let base = report.level(0).unwrap();
    assert_eq!((base.written, base.failed), (2, 1));
    let upper = report.level(1).unwrap();
    assert_eq!((upper.written, upper.failed), (1, 1));
    assert_eq!(starts(store.keys_at(1).await), vec![200]);
}

#[tokio::test]
async fn test_unreadable_source_tile_counts_as_failed() {
    let store = Arc::new(InMemoryTileStore::new());
    let builder = builder(&config(), store.clone(), Arc::new(ColorSource::new(RED)));
    store.fail_reads_of(key(0, 0)).await;

    let report = builder.create_cache_at(at_secs(450)).await.unwrap();
    let upper = report.level(1).unwrap();
    assert_eq!((upper.written, upper.failed), (2, 1));
}

/// Renders every window at a fixed, wrong size.
struct OddSizeSource;

#[async_trait]
impl DiagramSource for OddSizeSource {
    async fn render(&self, _window: TimeWindow) -> TimelinesResult<RgbaImage> {
        Ok(RgbaImage::from_pixel(7, 3, RED))
    }
}

#[tokio::test]
async fn test_wrong_size_render_is_not_stored() {
    let store = Arc::new(InMemoryTileStore::new());
    let builder = builder(&config(), store.clone(), Arc::new(OddSizeSource));

    let report = builder.create_cache_at(at_secs(250)).await.unwrap();

    let base = report.level(0).unwrap();
    assert_eq!((base.written, base.failed), (0, 3));
    // nothing below, so the level above is empty rather than failing
    let upper = report.level(1).unwrap();
    assert_eq!((upper.written, upper.skipped, upper.failed), (0, 2, 0));
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn test_unavailable_store_aborts() {
    let store = Arc::new(InMemoryTileStore::new());
    store.set_unavailable(true);
    let builder = builder(&config(), store, Arc::new(ColorSource::new(RED)));

    let err = builder.create_cache_at(at_secs(250)).await.unwrap_err();
    assert!(matches!(err, TimelinesError::StorageUnavailable(_)));
    let err = builder.update_cache_at(at_secs(250)).await.unwrap_err();
    assert!(err.is_fatal());
}

// ============================================================================
// Incremental update
// ============================================================================

#[tokio::test]
async fn test_update_on_empty_cache_builds_everything() {
    let store = Arc::new(InMemoryTileStore::new());
    let builder = builder(&config(), store.clone(), Arc::new(ColorSource::new(RED)));

    let report = builder.update_cache_at(at_secs(250)).await.unwrap();
    assert_eq!(report.level(0).unwrap().start, epoch());
    assert_eq!(report.written(), 5);
}

#[tokio::test]
async fn test_update_rebuilds_frontier_and_extends() {
    let store = Arc::new(InMemoryTileStore::new());
    let source = Arc::new(ColorSource::new(RED));
    let builder = builder(&config(), store.clone(), source.clone());

    builder.create_cache_at(at_secs(250)).await.unwrap();
    let untouched = [store.get(&key(0, 0)).await, store.get(&key(0, 100)).await, store.get(&key(1, 0)).await];

    // new samples arrive: the same windows now render differently
    source.set_color(BLUE);
    let report = builder.update_cache_at(at_secs(450)).await.unwrap();

    assert_eq!(report.level(0).unwrap().start, at_secs(200));
    assert_eq!(report.level(0).unwrap().written, 3);
    assert_eq!(report.level(1).unwrap().start, at_secs(200));
    assert_eq!(report.level(1).unwrap().written, 2);

    // tiles older than the frontier window keep their bytes
    assert_eq!(store.get(&key(0, 0)).await, untouched[0]);
    assert_eq!(store.get(&key(0, 100)).await, untouched[1]);
    assert_eq!(store.get(&key(1, 0)).await, untouched[2]);

    // the frontier tile reflects the new data
    let (image, _) = decoded(&store, key(0, 200)).await;
    assert_eq!(*image.get_pixel(50, 10), BLUE);
    let (image, _) = decoded(&store, key(1, 200)).await;
    assert_eq!(*image.get_pixel(0, 10), BLUE);
    assert_eq!(*image.get_pixel(99, 10), BLUE);

    assert_eq!(starts(store.keys_at(0).await), vec![0, 100, 200, 300, 400]);
    assert_eq!(starts(store.keys_at(1).await), vec![0, 200, 400]);
}

#[tokio::test]
async fn test_repeated_update_is_stable() {
    let store = Arc::new(InMemoryTileStore::new());
    let builder = builder(&config(), store.clone(), Arc::new(ColorSource::new(RED)));

    builder.create_cache_at(at_secs(250)).await.unwrap();
    let writes = store.write_count();
    let report = builder.update_cache_at(at_secs(250)).await.unwrap();

    // only the newest tile per level is revisited
    assert_eq!(report.written(), 2);
    assert_eq!(store.write_count(), writes + 2);
}

// ============================================================================
// Concurrency and persistence
// ============================================================================

#[tokio::test]
async fn test_parallel_workers_match_sequential_build() {
    let sequential = Arc::new(InMemoryTileStore::new());
    let parallel = Arc::new(InMemoryTileStore::new());
    let config3 = PyramidConfig {
        zoom_max: 3,
        ..config()
    };

    builder(&config3, sequential.clone(), Arc::new(ColorSource::failing_at(RED, &[300])))
        .create_cache_at(at_secs(2_050))
        .await
        .unwrap();
    builder(
        &PyramidConfig { workers: 4, ..config3.clone() },
        parallel.clone(),
        Arc::new(ColorSource::failing_at(RED, &[300])),
    )
    .create_cache_at(at_secs(2_050))
    .await
    .unwrap();

    for level in 0..=3 {
        let keys = sequential.keys_at(level).await;
        assert_eq!(keys, parallel.keys_at(level).await);
        for key in keys {
            assert_eq!(sequential.get(&key).await, parallel.get(&key).await, "tile {}", key);
        }
    }
}

#[tokio::test]
async fn test_create_twice_is_byte_identical_on_disk() {
    let dir = temp_cache_dir();
    let store = Arc::new(FsTileStore::new(dir.path()));
    let builder = builder(&config(), store.clone(), Arc::new(ColorSource::new(RED)));

    builder.create_cache_at(at_secs(250)).await.unwrap();
    let first: Vec<(TileKey, Option<Bytes>)> = {
        let mut tiles = Vec::new();
        for k in [key(0, 0), key(0, 100), key(0, 200), key(1, 0), key(1, 200)] {
            tiles.push((k, store.read(&k).await.unwrap()));
        }
        tiles
    };

    builder.create_cache_at(at_secs(250)).await.unwrap();
    for (k, bytes) in first {
        assert!(bytes.is_some());
        assert_eq!(store.read(&k).await.unwrap(), bytes, "tile {}", k);
    }
    assert!(dir.path().join("1/200000.png").is_file());
}

#[tokio::test]
async fn test_update_resumes_from_existing_cache_on_disk() {
    let dir = temp_cache_dir();
    {
        let store = Arc::new(FsTileStore::new(dir.path()));
        builder(&config(), store, Arc::new(ColorSource::new(RED)))
            .create_cache_at(at_secs(250))
            .await
            .unwrap();
    }

    // a fresh process sees only the files
    let store = Arc::new(FsTileStore::new(dir.path()));
    let source = Arc::new(ColorSource::new(BLUE));
    let report = builder(&config(), store.clone(), source.clone())
        .update_cache_at(at_secs(350))
        .await
        .unwrap();

    assert_eq!(report.level(0).unwrap().start, at_secs(200));
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    assert_eq!(store.latest_before(0, at_secs(350)).await.unwrap(), Some(key(0, 300)));
}

#[tokio::test]
async fn test_update_rebuilds_level_wiped_on_disk() {
    let dir = temp_cache_dir();
    let store = Arc::new(FsTileStore::new(dir.path()));
    let builder = builder(&config(), store.clone(), Arc::new(ColorSource::new(RED)));

    builder.create_cache_at(at_secs(250)).await.unwrap();
    std::fs::remove_dir_all(dir.path().join("1")).unwrap();

    // same store instance, as in a long-running updater
    let report = builder.update_cache_at(at_secs(250)).await.unwrap();

    let upper = report.level(1).unwrap();
    assert_eq!(upper.start, epoch());
    assert_eq!(upper.written, 2);
    assert!(dir.path().join("1/0.png").is_file());
    assert!(dir.path().join("1/200000.png").is_file());
}

#[tokio::test]
async fn test_prepopulated_tiles_are_composed() {
    let store = Arc::new(InMemoryTileStore::new());
    store.insert(key(0, 0), encoded_tile(&key(0, 0), &SMALL_GEOMETRY, BLUE)).await;
    let builder = builder(&config(), store.clone(), Arc::new(ColorSource::failing_at(RED, &[0, 100])));

    let report = builder.create_cache_at(at_secs(200)).await.unwrap();
    assert_eq!(report.level(0).unwrap().failed, 2);

    let (image, _) = decoded(&store, key(1, 0)).await;
    assert_eq!(*image.get_pixel(0, 0), BLUE);
}
