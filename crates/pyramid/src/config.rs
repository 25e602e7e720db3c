//! Cache configuration.
//!
//! Loaded from YAML or from `TIMELINES_*` environment variables and handed
//! to the builder at construction time.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use renderer::overlay_alpha_factor;
use timelines_common::{
    parse_instant, TileGeometry, TimelinesError, TimelinesResult, ZoomLevel, ZoomRange,
};

/// First instant of the averaged GOES archive, 1996-08-13T20:35:16Z.
pub const DEFAULT_DATASET_START_MS: i64 = 839_961_316_000;

/// Layout and scheduling of the tile pyramid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PyramidConfig {
    /// Root directory of the tile cache
    pub cache_path: PathBuf,
    /// Finest cached level, rendered from samples
    pub zoom_min: ZoomLevel,
    /// Coarsest cached level
    pub zoom_max: ZoomLevel,
    /// Tile width in pixels; one pixel column spans `2^level` seconds
    pub image_width: u32,
    pub image_height: u32,
    /// No tile starts before this instant
    pub dataset_start: DateTime<Utc>,
    /// Tiles of one level built concurrently (1 = strictly in time order)
    pub workers: usize,
    /// Overrides the alpha multiplier derived from the zoom range
    pub alpha_factor: Option<f32>,
}

impl Default for PyramidConfig {
    fn default() -> Self {
        Self {
            cache_path: PathBuf::from("./cache"),
            zoom_min: 8,
            zoom_max: 16,
            image_width: 1000,
            image_height: 300,
            dataset_start: Utc
                .timestamp_millis_opt(DEFAULT_DATASET_START_MS)
                .single()
                .unwrap_or_default(),
            workers: 1,
            alpha_factor: None,
        }
    }
}

impl PyramidConfig {
    /// Load a YAML file. Missing fields take their defaults.
    pub fn from_yaml(path: impl AsRef<Path>) -> TimelinesResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            TimelinesError::InvalidConfig(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> TimelinesResult<Self> {
        serde_yaml::from_str(text)
            .map_err(|e| TimelinesError::InvalidConfig(format!("Invalid YAML: {}", e)))
    }

    /// Defaults overridden by whatever `TIMELINES_*` variables are set.
    pub fn from_env() -> TimelinesResult<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply `TIMELINES_*` environment variables on top of `self`.
    pub fn with_env_overrides(mut self) -> TimelinesResult<Self> {
        if let Ok(val) = std::env::var("TIMELINES_CACHE_PATH") {
            self.cache_path = PathBuf::from(val);
        }
        if let Some(level) = env_parse("TIMELINES_ZOOM_MIN")? {
            self.zoom_min = level;
        }
        if let Some(level) = env_parse("TIMELINES_ZOOM_MAX")? {
            self.zoom_max = level;
        }
        if let Some(width) = env_parse("TIMELINES_IMAGE_WIDTH")? {
            self.image_width = width;
        }
        if let Some(height) = env_parse("TIMELINES_IMAGE_HEIGHT")? {
            self.image_height = height;
        }
        if let Ok(val) = std::env::var("TIMELINES_DATASET_START") {
            self.dataset_start = parse_instant(&val)?;
        }
        if let Some(workers) = env_parse("TIMELINES_WORKERS")? {
            self.workers = workers;
        }
        if let Some(factor) = env_parse("TIMELINES_ALPHA_FACTOR")? {
            self.alpha_factor = Some(factor);
        }
        Ok(self)
    }

    /// Reject settings the builder cannot work with.
    pub fn validate(&self) -> TimelinesResult<()> {
        let zoom = self.zoom_range()?;

        if self.image_width == 0 || self.image_height == 0 {
            return Err(TimelinesError::InvalidConfig(format!(
                "image size must be non-zero, got {}x{}",
                self.image_width, self.image_height
            )));
        }

        if self.workers == 0 {
            return Err(TimelinesError::InvalidConfig("workers must be at least 1".into()));
        }

        if self.geometry().checked_duration_ms(zoom.max).is_none() {
            return Err(TimelinesError::InvalidConfig(format!(
                "tile duration at level {} overflows",
                zoom.max
            )));
        }

        if let Some(factor) = self.alpha_factor {
            if !factor.is_finite() || factor < 0.0 {
                return Err(TimelinesError::InvalidConfig(format!(
                    "alpha_factor must be a non-negative number, got {}",
                    factor
                )));
            }
        }

        Ok(())
    }

    pub fn zoom_range(&self) -> TimelinesResult<ZoomRange> {
        ZoomRange::new(self.zoom_min, self.zoom_max)
    }

    pub fn geometry(&self) -> TileGeometry {
        TileGeometry::new(self.image_width, self.image_height)
    }

    /// Alpha multiplier for composed tiles: the override if set, otherwise
    /// the value derived from the zoom range.
    pub fn effective_alpha_factor(&self) -> TimelinesResult<f32> {
        match self.alpha_factor {
            Some(factor) => Ok(factor),
            None => Ok(overlay_alpha_factor(&self.zoom_range()?)),
        }
    }
}

fn env_parse<T>(name: &str) -> TimelinesResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(val) => val.trim().parse().map(Some).map_err(|e: T::Err| {
            TimelinesError::InvalidConfig(format!("{}='{}': {}", name, val, e))
        }),
        Err(_) => Ok(None),
    }
}
