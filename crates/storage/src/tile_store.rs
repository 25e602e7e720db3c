//! Durable tile storage keyed by zoom level and start time.
//!
//! Layout: `{root}/{level}/{start_ms}.png`. Writes go to a `.partial` file in
//! the same directory and are renamed into place, so readers never observe a
//! half-written tile.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use timelines_common::{TileKey, TimelinesError, TimelinesResult, ZoomLevel};

/// Suffix of tiles that are still being written.
const PARTIAL_SUFFIX: &str = "partial";

/// Persistent mapping from [`TileKey`] to encoded tile bytes.
///
/// A tile that was never written is reported as `Ok(None)`; errors are
/// reserved for storage that misbehaves.
#[async_trait]
pub trait TileStore: Send + Sync {
    /// Make sure the store can be used at all.
    ///
    /// Fails with [`TimelinesError::StorageUnavailable`] when it cannot.
    async fn ensure_ready(&self) -> TimelinesResult<()>;

    /// Persist a tile, replacing any previous version.
    async fn write(&self, key: &TileKey, data: Bytes) -> TimelinesResult<()>;

    /// Read a tile, or `None` when it does not exist.
    async fn read(&self, key: &TileKey) -> TimelinesResult<Option<Bytes>>;

    async fn exists(&self, key: &TileKey) -> TimelinesResult<bool>;

    /// The tile with the greatest start time `<= now` at `level`.
    async fn latest_before(
        &self,
        level: ZoomLevel,
        now: DateTime<Utc>,
    ) -> TimelinesResult<Option<TileKey>>;
}

/// Filesystem-backed tile store with an ordered in-memory index.
///
/// The index is filled by scanning the cache directory on first use and on
/// every [`TileStore::ensure_ready`], and kept current by [`TileStore::write`]
/// in between. Tiles removed from disk by anything else are only noticed at
/// the next `ensure_ready`.
pub struct FsTileStore {
    root: PathBuf,
    index: RwLock<Option<BTreeSet<TileKey>>>,
}

impl FsTileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: RwLock::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of the file holding `key`.
    pub fn tile_path(&self, key: &TileKey) -> PathBuf {
        self.root.join(key.level.to_string()).join(key.file_name())
    }

    /// Number of tiles currently indexed.
    pub async fn len(&self) -> TimelinesResult<usize> {
        self.load_index().await?;
        Ok(self.index.read().await.as_ref().map_or(0, |keys| keys.len()))
    }

    pub async fn is_empty(&self) -> TimelinesResult<bool> {
        Ok(self.len().await? == 0)
    }

    async fn load_index(&self) -> TimelinesResult<()> {
        if self.index.read().await.is_some() {
            return Ok(());
        }

        let mut guard = self.index.write().await;
        if guard.is_some() {
            return Ok(());
        }

        let root = self.root.clone();
        let keys = tokio::task::spawn_blocking(move || scan_tiles(&root))
            .await
            .map_err(|e| TimelinesError::InternalError(format!("Index scan panicked: {}", e)))??;

        info!(root = %self.root.display(), tiles = keys.len(), "Indexed tile cache");
        *guard = Some(keys);
        Ok(())
    }
}

#[async_trait]
impl TileStore for FsTileStore {
    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn ensure_ready(&self) -> TimelinesResult<()> {
        fs::create_dir_all(&self.root).await.map_err(|e| {
            TimelinesError::StorageUnavailable(format!(
                "Cannot create cache root {}: {}",
                self.root.display(),
                e
            ))
        })?;

        // one scan per sweep
        *self.index.write().await = None;
        self.load_index().await
    }

    #[instrument(skip(self, data), fields(key = %key, size = data.len()))]
    async fn write(&self, key: &TileKey, data: Bytes) -> TimelinesResult<()> {
        let final_path = self.tile_path(key);
        let temp_path = final_path.with_extension(format!("png.{}", PARTIAL_SUFFIX));

        if let Some(dir) = final_path.parent() {
            fs::create_dir_all(dir).await.map_err(|e| {
                TimelinesError::StorageError(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }

        fs::write(&temp_path, &data).await.map_err(|e| {
            TimelinesError::StorageError(format!("Failed to write {}: {}", temp_path.display(), e))
        })?;

        if let Err(e) = fs::rename(&temp_path, &final_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(TimelinesError::StorageError(format!(
                "Failed to move tile into place at {}: {}",
                final_path.display(),
                e
            )));
        }

        if let Some(keys) = self.index.write().await.as_mut() {
            keys.insert(*key);
        }

        debug!("Wrote tile");
        Ok(())
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn read(&self, key: &TileKey) -> TimelinesResult<Option<Bytes>> {
        let path = self.tile_path(key);
        match fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TimelinesError::StorageError(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn exists(&self, key: &TileKey) -> TimelinesResult<bool> {
        fs::try_exists(self.tile_path(key)).await.map_err(|e| {
            TimelinesError::StorageError(format!("Failed to check {}: {}", key, e))
        })
    }

    #[instrument(skip(self))]
    async fn latest_before(
        &self,
        level: ZoomLevel,
        now: DateTime<Utc>,
    ) -> TimelinesResult<Option<TileKey>> {
        self.load_index().await?;

        let index = self.index.read().await;
        let lowest = TileKey::from_millis(level, i64::MIN);
        let highest = TileKey::from_millis(level, now.timestamp_millis());
        let latest = index
            .as_ref()
            .and_then(|keys| keys.range(lowest..=highest).next_back().copied());

        debug!(latest = ?latest.map(|k| k.start_ms), "Looked up latest tile");
        Ok(latest)
    }
}

/// Collect every complete tile under `root`.
///
/// A missing root is an empty cache. Any other failure to walk the tree
/// makes the store unusable.
fn scan_tiles(root: &Path) -> TimelinesResult<BTreeSet<TileKey>> {
    let mut keys = BTreeSet::new();
    if !root.exists() {
        return Ok(keys);
    }

    for entry in WalkDir::new(root).min_depth(2).max_depth(2) {
        let entry = entry.map_err(|e| {
            TimelinesError::StorageUnavailable(format!("Cannot scan {}: {}", root.display(), e))
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("png") {
            continue;
        }

        let level = path
            .parent()
            .and_then(|dir| dir.file_name())
            .and_then(|name| name.to_str())
            .and_then(|name| name.parse::<ZoomLevel>().ok());
        let file_name = path.file_name().and_then(|name| name.to_str());

        if let (Some(level), Some(file_name)) = (level, file_name) {
            if let Some(key) = TileKey::parse_file_name(level, file_name) {
                keys.insert(key);
            }
        }
    }

    Ok(keys)
}
