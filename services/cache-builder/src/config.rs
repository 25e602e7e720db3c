//! Settings for one run of the binary.
//!
//! Layered in this order, later layers winning: built-in defaults, the YAML
//! file given with `--config`, `TIMELINES_*` environment variables, then
//! command line flags.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pyramid::PyramidConfig;

/// Sample store root used when nothing else is configured.
pub const DEFAULT_DATA_PATH: &str = "./data";

#[derive(Debug, Clone)]
pub struct Settings {
    pub pyramid: PyramidConfig,
    /// Root of the sample store
    pub data_path: PathBuf,
}

/// Values given on the command line; `None` leaves the lower layer alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub data_path: Option<PathBuf>,
    pub cache_path: Option<PathBuf>,
}

impl Settings {
    pub fn load(overrides: &Overrides) -> Result<Self> {
        let base = match &overrides.config {
            Some(path) => load_yaml(path)?,
            None => PyramidConfig::default(),
        };
        let mut pyramid = base
            .with_env_overrides()
            .context("Invalid TIMELINES_* environment variable")?;

        if let Some(cache_path) = &overrides.cache_path {
            pyramid.cache_path = cache_path.clone();
        }
        pyramid.validate().context("Invalid cache configuration")?;

        let data_path = overrides
            .data_path
            .clone()
            .or_else(|| std::env::var("TIMELINES_DATA_PATH").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_PATH));

        Ok(Self { pyramid, data_path })
    }
}

fn load_yaml(path: &Path) -> Result<PyramidConfig> {
    PyramidConfig::from_yaml(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}
