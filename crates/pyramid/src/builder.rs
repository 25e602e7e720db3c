//! Construction and incremental extension of the tile pyramid.
//!
//! Levels are built finest first. A level starts only after every tile of
//! the level below has been attempted, because its tiles are composed from
//! those. Within a level up to `workers` tiles are in flight at once; each
//! key is produced at most once per sweep.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use image::RgbaImage;
use metrics::counter;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinError;
use tracing::{debug, info, instrument, warn};

use renderer::{compose, decode_image, dimension_mismatch, encode_tile, ComposeOptions};
use storage::TileStore;
use timelines_common::{
    TileGeometry, TileKey, TileMetadata, TimelinesError, TimelinesResult, ZoomLevel, ZoomRange,
};

use crate::config::PyramidConfig;
use crate::report::{LevelReport, SweepKind, SweepReport};
use crate::source::DiagramSource;

/// Log level progress every this many tiles.
const PROGRESS_INTERVAL: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TileOutcome {
    Written,
    Skipped,
    Failed,
}

impl TileOutcome {
    fn metric_name(self) -> &'static str {
        match self {
            TileOutcome::Written => "timelines_tiles_written_total",
            TileOutcome::Skipped => "timelines_tiles_skipped_total",
            TileOutcome::Failed => "timelines_tiles_failed_total",
        }
    }
}

/// Drives `create_cache` and `update_cache` over every configured level.
pub struct PyramidBuilder {
    zoom: ZoomRange,
    geometry: TileGeometry,
    dataset_start: DateTime<Utc>,
    workers: usize,
    compose: ComposeOptions,
    store: Arc<dyn TileStore>,
    source: Arc<dyn DiagramSource>,
}

impl PyramidBuilder {
    /// Validate `config` and wire the builder to its store and source.
    pub fn new(
        config: &PyramidConfig,
        store: Arc<dyn TileStore>,
        source: Arc<dyn DiagramSource>,
    ) -> TimelinesResult<Self> {
        config.validate()?;
        let geometry = config.geometry();

        Ok(Self {
            zoom: config.zoom_range()?,
            geometry,
            dataset_start: config.dataset_start,
            workers: config.workers,
            compose: ComposeOptions::new(geometry, config.effective_alpha_factor()?),
            store,
            source,
        })
    }

    pub fn zoom_range(&self) -> ZoomRange {
        self.zoom
    }

    pub fn geometry(&self) -> TileGeometry {
        self.geometry
    }

    /// Build every level from the dataset start up to the current time.
    pub async fn create_cache(&self) -> TimelinesResult<SweepReport> {
        self.create_cache_at(Utc::now()).await
    }

    /// [`create_cache`](Self::create_cache) against a fixed `now`.
    pub async fn create_cache_at(&self, now: DateTime<Utc>) -> TimelinesResult<SweepReport> {
        self.sweep(SweepKind::Create, now).await
    }

    /// Rebuild the newest tile of every level and extend each level up to
    /// the current time.
    pub async fn update_cache(&self) -> TimelinesResult<SweepReport> {
        self.update_cache_at(Utc::now()).await
    }

    /// [`update_cache`](Self::update_cache) against a fixed `now`.
    pub async fn update_cache_at(&self, now: DateTime<Utc>) -> TimelinesResult<SweepReport> {
        self.sweep(SweepKind::Update, now).await
    }

    /// Start times of the tiles visited at `level`, from `start` while the
    /// tile starts before `now`.
    pub fn level_keys(&self, level: ZoomLevel, start: DateTime<Utc>, now: DateTime<Utc>) -> Vec<TileKey> {
        let duration = self.geometry.duration_ms(level);
        let now_ms = now.timestamp_millis();

        let mut keys = Vec::new();
        let mut t = start.timestamp_millis();
        while t < now_ms {
            keys.push(TileKey::from_millis(level, t));
            t = t.saturating_add(duration);
        }
        keys
    }

    #[instrument(skip(self), fields(zoom_min = self.zoom.min, zoom_max = self.zoom.max))]
    async fn sweep(&self, kind: SweepKind, now: DateTime<Utc>) -> TimelinesResult<SweepReport> {
        let started = Instant::now();
        self.store.ensure_ready().await?;

        info!(workers = self.workers, "Starting cache sweep");

        let mut levels = Vec::with_capacity(self.zoom.levels().count());
        for level in self.zoom.levels() {
            let start = match kind {
                SweepKind::Create => self.dataset_start,
                SweepKind::Update => match self.store.latest_before(level, now).await? {
                    Some(latest) => latest.start()?,
                    None => self.dataset_start,
                },
            };

            // build_level returns once every tile of this level was attempted,
            // so the next level reads a complete level below.
            levels.push(self.build_level(level, start, now).await?);
        }

        let report = SweepReport {
            kind,
            now,
            levels,
            elapsed: started.elapsed(),
        };

        info!(
            written = report.written(),
            skipped = report.skipped(),
            failed = report.failed(),
            duration_ms = report.elapsed.as_millis(),
            "Cache sweep complete"
        );
        Ok(report)
    }

    #[instrument(skip(self, start, now))]
    async fn build_level(
        &self,
        level: ZoomLevel,
        start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> TimelinesResult<LevelReport> {
        let keys = self.level_keys(level, start, now);
        let total = keys.len();

        let mut report = LevelReport::new(level, start);
        report.frontier = keys
            .last()
            .and_then(|key| key.window(&self.geometry).ok())
            .filter(|window| window.is_provisional(&now))
            .map(|window| window.start);

        info!(tiles = total, start = %start, "Building level");

        let mut outcomes = stream::iter(keys)
            .map(|key| self.produce_tile(key, now))
            .buffer_unordered(self.workers);

        while let Some(outcome) = outcomes.next().await {
            match outcome? {
                TileOutcome::Written => report.written += 1,
                TileOutcome::Skipped => report.skipped += 1,
                TileOutcome::Failed => report.failed += 1,
            }

            let completed = report.visited();
            if completed % PROGRESS_INTERVAL == 0 {
                info!(
                    progress = format!("{}/{}", completed, total),
                    written = report.written,
                    skipped = report.skipped,
                    failed = report.failed,
                    "Level progress"
                );
            }
        }

        info!(
            written = report.written,
            skipped = report.skipped,
            failed = report.failed,
            frontier = ?report.frontier,
            "Level complete"
        );
        Ok(report)
    }

    /// Produce one tile. Only errors that make the store unusable escape;
    /// anything else is logged and counted as a failed tile.
    async fn produce_tile(&self, key: TileKey, now: DateTime<Utc>) -> TimelinesResult<TileOutcome> {
        let outcome = match self.try_produce_tile(&key, now).await {
            Ok(true) => {
                debug!(tile = %key, "Wrote tile");
                TileOutcome::Written
            }
            Ok(false) => TileOutcome::Skipped,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(tile = %key, error = %e, "Failed to produce tile");
                TileOutcome::Failed
            }
        };

        counter!(outcome.metric_name(), "level" => key.level.to_string()).increment(1);
        Ok(outcome)
    }

    /// `Ok(false)` when the window has nothing to compose from.
    async fn try_produce_tile(&self, key: &TileKey, now: DateTime<Utc>) -> TimelinesResult<bool> {
        let window = key.window(&self.geometry)?;

        let image = if self.zoom.is_base(key.level) {
            let image = self.source.render(window).await?;
            if let Some(message) = dimension_mismatch("rendered", &image, &self.geometry) {
                return Err(TimelinesError::RenderError(message));
            }
            image
        } else {
            match self.compose_from_below(key, now).await? {
                Some(image) => image,
                None => return Ok(false),
            }
        };

        let metadata = TileMetadata::new(key.level, window);
        let encoded = tokio::task::spawn_blocking(move || encode_tile(&image, &metadata))
            .await
            .map_err(join_error)??;

        self.store.write(key, Bytes::from(encoded)).await?;
        Ok(true)
    }

    /// Compose `key` from the two tiles below it.
    ///
    /// A missing left tile means there is no data for the window, so no tile
    /// is produced. A missing right tile is padded with transparency, whether
    /// it lies in the future or is a gap in the past.
    async fn compose_from_below(
        &self,
        key: &TileKey,
        now: DateTime<Utc>,
    ) -> TimelinesResult<Option<RgbaImage>> {
        let (left_key, right_key) = key.sources(&self.geometry).ok_or_else(|| {
            TimelinesError::InternalError(format!("tile {} has no level below", key))
        })?;

        let Some(left) = self.store.read(&left_key).await? else {
            debug!(tile = %key, missing = %left_key, "No source tile below, leaving gap");
            return Ok(None);
        };

        let right = if right_key.start_ms < now.timestamp_millis() {
            let right = self.store.read(&right_key).await?;
            if right.is_none() {
                debug!(tile = %key, missing = %right_key, "Right source tile missing, padding");
            }
            right
        } else {
            None
        };

        let options = self.compose;
        let image = tokio::task::spawn_blocking(move || {
            let left = decode_image(&left)?;
            let right = right.map(|bytes| decode_image(&bytes)).transpose()?;
            compose(&left, right.as_ref(), &options)
        })
        .await
        .map_err(join_error)??;

        Ok(Some(image))
    }
}

fn join_error(e: JoinError) -> TimelinesError {
    TimelinesError::InternalError(format!("Tile task failed: {}", e))
}
