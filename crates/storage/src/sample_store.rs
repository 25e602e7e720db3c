//! File-backed store of flux samples with an LRU cache of decoded months.
//!
//! Samples live in one JSON file per UTC month:
//! `{data_path}/samples/YYYY-MM.json`, sorted by timestamp.

use chrono::{DateTime, Datelike, Utc};
use lru::LruCache;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use timelines_common::time::{first_day_of_month, first_day_of_next_month};
use timelines_common::{FluxSample, TimelinesError, TimelinesResult};

/// Months kept decoded in memory when no capacity is given.
pub const DEFAULT_MONTH_CAPACITY: usize = 12;

type Month = Arc<Vec<FluxSample>>;

/// Time-series store read by the diagram source and fed by ingestion.
pub struct SampleStore {
    dir: PathBuf,
    /// month key ("YYYY-MM") -> samples of that month
    cache: Mutex<LruCache<String, Month>>,
    stats: Mutex<CacheStats>,
    /// Serializes read-modify-write cycles of month files
    write_lock: Mutex<()>,
}

#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

impl SampleStore {
    /// Open the store under `data_path`, caching up to `capacity` months.
    pub fn new(data_path: impl AsRef<Path>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            dir: data_path.as_ref().join("samples"),
            cache: Mutex::new(LruCache::new(capacity)),
            stats: Mutex::new(CacheStats::default()),
            write_lock: Mutex::new(()),
        }
    }

    /// Path of the file holding the month that contains `dt`.
    pub fn month_path(&self, dt: &DateTime<Utc>) -> PathBuf {
        self.dir.join(format!("{}.json", month_key(dt)))
    }

    /// Merge `samples` into the store.
    ///
    /// A sample whose timestamp is already stored replaces the old one.
    /// Returns the number of samples written.
    #[instrument(skip(self, samples), fields(count = samples.len()))]
    pub async fn append(&self, samples: &[FluxSample]) -> TimelinesResult<usize> {
        let mut by_month: BTreeMap<String, Vec<FluxSample>> = BTreeMap::new();
        for sample in samples {
            by_month
                .entry(month_key(&sample.timestamp))
                .or_default()
                .push(*sample);
        }

        let _guard = self.write_lock.lock().await;
        fs::create_dir_all(&self.dir).await.map_err(|e| {
            TimelinesError::StorageError(format!("Failed to create {}: {}", self.dir.display(), e))
        })?;

        for (key, new_samples) in by_month {
            let path = self.dir.join(format!("{}.json", key));
            let existing = read_month(&path).await?;

            let mut merged: BTreeMap<i64, FluxSample> = existing
                .into_iter()
                .map(|s| (s.timestamp.timestamp_millis(), s))
                .collect();
            for sample in new_samples {
                merged.insert(sample.timestamp.timestamp_millis(), sample);
            }
            let month: Vec<FluxSample> = merged.into_values().collect();

            write_month(&path, &month).await?;
            debug!(month = %key, samples = month.len(), "Stored month");
            self.cache.lock().await.put(key, Arc::new(month));
        }

        Ok(samples.len())
    }

    /// All samples with `start <= timestamp < end`, in time order.
    #[instrument(skip(self))]
    pub async fn range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> TimelinesResult<Vec<FluxSample>> {
        let mut result = Vec::new();
        if end <= start {
            return Ok(result);
        }

        let mut month_start = first_day_of_month(&start);
        while month_start < end {
            let month = self.month(&month_start).await?;
            result.extend(
                month
                    .iter()
                    .filter(|s| s.timestamp >= start && s.timestamp < end)
                    .copied(),
            );

            let next = first_day_of_next_month(&month_start);
            if next <= month_start {
                break;
            }
            month_start = next;
        }

        Ok(result)
    }

    pub async fn stats(&self) -> CacheStats {
        self.stats.lock().await.clone()
    }

    /// Decoded samples of the month containing `dt`.
    async fn month(&self, dt: &DateTime<Utc>) -> TimelinesResult<Month> {
        let key = month_key(dt);
        {
            let mut cache = self.cache.lock().await;
            if let Some(month) = cache.get(&key) {
                self.stats.lock().await.hits += 1;
                return Ok(month.clone());
            }
        }

        let month = Arc::new(read_month(&self.dir.join(format!("{}.json", key))).await?);

        let mut cache = self.cache.lock().await;
        let mut stats = self.stats.lock().await;
        stats.misses += 1;
        if cache.len() >= cache.cap().get() && !cache.contains(&key) {
            stats.evictions += 1;
        }
        cache.put(key, month.clone());

        Ok(month)
    }
}

fn month_key(dt: &DateTime<Utc>) -> String {
    format!("{:04}-{:02}", dt.year(), dt.month())
}

/// A month file that does not exist holds no samples.
async fn read_month(path: &Path) -> TimelinesResult<Vec<FluxSample>> {
    match fs::read(path).await {
        Ok(data) => serde_json::from_slice(&data).map_err(|e| {
            TimelinesError::DataReadError(format!("Corrupt sample file {}: {}", path.display(), e))
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(TimelinesError::DataReadError(format!(
            "Failed to read {}: {}",
            path.display(),
            e
        ))),
    }
}

async fn write_month(path: &Path, samples: &[FluxSample]) -> TimelinesResult<()> {
    let data = serde_json::to_vec(samples)?;
    let temp_path = path.with_extension("json.partial");
    fs::write(&temp_path, data).await?;
    fs::rename(&temp_path, path).await?;
    Ok(())
}
