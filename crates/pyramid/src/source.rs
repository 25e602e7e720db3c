//! Producers of base-level diagrams.

use async_trait::async_trait;
use image::RgbaImage;
use std::sync::Arc;
use tracing::debug;

use renderer::plot_flux;
use storage::SampleStore;
use timelines_common::{TileGeometry, TimeWindow, TimelinesError, TimelinesResult};

/// Renders the diagram for one base-level window.
///
/// Output for a window may change between calls once new samples have been
/// ingested; that is why the newest tile of every level is rebuilt on each
/// update.
#[async_trait]
pub trait DiagramSource: Send + Sync {
    async fn render(&self, window: TimeWindow) -> TimelinesResult<RgbaImage>;
}

/// Plots flux samples read from a [`SampleStore`].
pub struct SampleDiagramSource {
    samples: Arc<SampleStore>,
    geometry: TileGeometry,
}

impl SampleDiagramSource {
    pub fn new(samples: Arc<SampleStore>, geometry: TileGeometry) -> Self {
        Self { samples, geometry }
    }
}

#[async_trait]
impl DiagramSource for SampleDiagramSource {
    async fn render(&self, window: TimeWindow) -> TimelinesResult<RgbaImage> {
        let samples = self.samples.range(window.start, window.end).await?;
        debug!(window = %window, samples = samples.len(), "Plotting diagram");

        let geometry = self.geometry;
        tokio::task::spawn_blocking(move || plot_flux(&samples, &window, &geometry))
            .await
            .map_err(|e| TimelinesError::RenderError(format!("Plot task failed: {}", e)))
    }
}
