//! Tests for the filesystem tile store.

use bytes::Bytes;
use chrono::{TimeZone, Utc};
use storage::{FsTileStore, TileStore};
use timelines_common::{TileKey, TimelinesError};

fn at(ms: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).unwrap()
}

// ============================================================================
// Read / write
// ============================================================================

#[tokio::test]
async fn test_write_then_read() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsTileStore::new(dir.path());
    store.ensure_ready().await.unwrap();

    let key = TileKey::from_millis(8, 839_961_316_000);
    store.write(&key, Bytes::from_static(b"tile")).await.unwrap();

    assert_eq!(store.read(&key).await.unwrap(), Some(Bytes::from_static(b"tile")));
    assert!(store.exists(&key).await.unwrap());
    assert!(dir.path().join("8/839961316000.png").is_file());
}

#[tokio::test]
async fn test_missing_tile_is_none() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsTileStore::new(dir.path());

    let key = TileKey::from_millis(8, 0);
    assert_eq!(store.read(&key).await.unwrap(), None);
    assert!(!store.exists(&key).await.unwrap());
}

#[tokio::test]
async fn test_write_overwrites() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsTileStore::new(dir.path());
    let key = TileKey::from_millis(0, 200_000);

    store.write(&key, Bytes::from_static(b"first")).await.unwrap();
    store.write(&key, Bytes::from_static(b"second")).await.unwrap();

    assert_eq!(store.read(&key).await.unwrap(), Some(Bytes::from_static(b"second")));
    assert_eq!(store.len().await.unwrap(), 1);
    // no leftovers from the atomic write
    assert_eq!(std::fs::read_dir(dir.path().join("0")).unwrap().count(), 1);
}

#[tokio::test]
async fn test_unusable_root_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("occupied");
    std::fs::write(&file, b"not a directory").unwrap();

    let store = FsTileStore::new(&file);
    let err = store.ensure_ready().await.unwrap_err();
    assert!(matches!(err, TimelinesError::StorageUnavailable(_)));
    assert!(err.is_fatal());
}

// ============================================================================
// latest_before
// ============================================================================

#[tokio::test]
async fn test_latest_before_empty_level() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsTileStore::new(dir.path());
    store.ensure_ready().await.unwrap();

    assert_eq!(store.latest_before(8, Utc::now()).await.unwrap(), None);
}

#[tokio::test]
async fn test_latest_before_picks_greatest_not_after_now() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsTileStore::new(dir.path());
    store.ensure_ready().await.unwrap();

    for ms in [0, 100_000, 200_000, 300_000] {
        store.write(&TileKey::from_millis(0, ms), Bytes::new()).await.unwrap();
    }
    store.write(&TileKey::from_millis(1, 400_000), Bytes::new()).await.unwrap();

    assert_eq!(
        store.latest_before(0, at(250_000)).await.unwrap(),
        Some(TileKey::from_millis(0, 200_000))
    );
    // inclusive of now
    assert_eq!(
        store.latest_before(0, at(300_000)).await.unwrap(),
        Some(TileKey::from_millis(0, 300_000))
    );
    assert_eq!(store.latest_before(0, at(-1)).await.unwrap(), None);
    assert_eq!(store.latest_before(1, at(399_999)).await.unwrap(), None);
}

#[tokio::test]
async fn test_index_rebuilt_from_existing_cache() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = FsTileStore::new(dir.path());
        store.write(&TileKey::from_millis(9, 1_000), Bytes::new()).await.unwrap();
        store.write(&TileKey::from_millis(9, 5_000), Bytes::new()).await.unwrap();
    }

    let reopened = FsTileStore::new(dir.path());
    reopened.ensure_ready().await.unwrap();
    assert_eq!(reopened.len().await.unwrap(), 2);
    assert_eq!(
        reopened.latest_before(9, at(10_000)).await.unwrap(),
        Some(TileKey::from_millis(9, 5_000))
    );
}

#[tokio::test]
async fn test_ensure_ready_forgets_tiles_removed_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsTileStore::new(dir.path());
    store.ensure_ready().await.unwrap();

    store.write(&TileKey::from_millis(0, 100_000), Bytes::new()).await.unwrap();
    store.write(&TileKey::from_millis(1, 0), Bytes::new()).await.unwrap();
    assert!(store.latest_before(0, at(500_000)).await.unwrap().is_some());

    std::fs::remove_dir_all(dir.path().join("0")).unwrap();
    store.ensure_ready().await.unwrap();

    assert_eq!(store.latest_before(0, at(500_000)).await.unwrap(), None);
    assert_eq!(
        store.latest_before(1, at(500_000)).await.unwrap(),
        Some(TileKey::from_millis(1, 0))
    );
    assert_eq!(store.len().await.unwrap(), 1);
}
