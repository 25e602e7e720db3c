//! In-memory [`TileStore`] with failure injection.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

use storage::TileStore;
use timelines_common::{TileKey, TimelinesError, TimelinesResult, ZoomLevel};

/// Tile store kept in a `BTreeMap`, for tests that need no filesystem.
#[derive(Default)]
pub struct InMemoryTileStore {
    tiles: RwLock<BTreeMap<TileKey, Bytes>>,
    failing_reads: RwLock<HashSet<TileKey>>,
    failing_writes: RwLock<HashSet<TileKey>>,
    unavailable: AtomicBool,
    writes: AtomicUsize,
}

impl InMemoryTileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads of `key` fail with a storage error.
    pub async fn fail_reads_of(&self, key: TileKey) {
        self.failing_reads.write().await.insert(key);
    }

    /// Writes of `key` fail with a storage error.
    pub async fn fail_writes_of(&self, key: TileKey) {
        self.failing_writes.write().await.insert(key);
    }

    /// Every operation fails as if the backing storage were gone.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Put a tile in place without counting it as a write.
    pub async fn insert(&self, key: TileKey, data: Bytes) {
        self.tiles.write().await.insert(key, data);
    }

    pub async fn remove(&self, key: &TileKey) -> Option<Bytes> {
        self.tiles.write().await.remove(key)
    }

    pub async fn get(&self, key: &TileKey) -> Option<Bytes> {
        self.tiles.read().await.get(key).cloned()
    }

    /// Keys stored at `level`, in time order.
    pub async fn keys_at(&self, level: ZoomLevel) -> Vec<TileKey> {
        self.tiles
            .read()
            .await
            .keys()
            .filter(|k| k.level == level)
            .copied()
            .collect()
    }

    /// Successful writes since creation.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> TimelinesResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TimelinesError::StorageUnavailable("in-memory store switched off".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl TileStore for InMemoryTileStore {
    async fn ensure_ready(&self) -> TimelinesResult<()> {
        self.check_available()
    }

    async fn write(&self, key: &TileKey, data: Bytes) -> TimelinesResult<()> {
        self.check_available()?;
        if self.failing_writes.read().await.contains(key) {
            return Err(TimelinesError::StorageError(format!("injected write failure for {}", key)));
        }
        self.tiles.write().await.insert(*key, data);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn read(&self, key: &TileKey) -> TimelinesResult<Option<Bytes>> {
        self.check_available()?;
        if self.failing_reads.read().await.contains(key) {
            return Err(TimelinesError::StorageError(format!("injected read failure for {}", key)));
        }
        Ok(self.tiles.read().await.get(key).cloned())
    }

    async fn exists(&self, key: &TileKey) -> TimelinesResult<bool> {
        self.check_available()?;
        Ok(self.tiles.read().await.contains_key(key))
    }

    async fn latest_before(
        &self,
        level: ZoomLevel,
        now: DateTime<Utc>,
    ) -> TimelinesResult<Option<TileKey>> {
        self.check_available()?;
        let lowest = TileKey::from_millis(level, i64::MIN);
        let highest = TileKey::from_millis(level, now.timestamp_millis());
        Ok(self
            .tiles
            .read()
            .await
            .range(lowest..=highest)
            .next_back()
            .map(|(key, _)| *key))
    }
}
