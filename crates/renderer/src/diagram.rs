//! Flux diagram plotting for base-level tiles.
//!
//! Each pixel column covers an equal slice of the tile window. For every
//! column the min-max span of each channel is drawn as a vertical segment on
//! a logarithmic axis running from [`AXIS_MIN`] at the bottom to [`AXIS_MAX`]
//! at the top.

use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_line_segment_mut;
use timelines_common::{FluxSample, TileGeometry, TimeWindow};

/// Flux at the bottom edge of the diagram, W/m².
pub const AXIS_MIN: f32 = 1e-9;
/// Flux at the top edge of the diagram, W/m².
pub const AXIS_MAX: f32 = 1e-2;

/// 0.05-0.4 nm channel
pub const LOW_CHANNEL_COLOR: Rgba<u8> = Rgba([64, 96, 255, 255]);
/// 0.1-0.8 nm channel
pub const HIGH_CHANNEL_COLOR: Rgba<u8> = Rgba([255, 64, 32, 255]);

#[derive(Debug, Clone, Copy)]
struct Span {
    min: f32,
    max: f32,
}

impl Span {
    fn include(span: &mut Option<Span>, value: f32) {
        if value.is_nan() || value <= 0.0 {
            return;
        }
        match span {
            Some(s) => {
                s.min = s.min.min(value);
                s.max = s.max.max(value);
            }
            None => *span = Some(Span { min: value, max: value }),
        }
    }
}

/// Plot `samples` falling into `window` onto a transparent tile.
///
/// Samples outside the window and non-positive values are ignored, so an
/// empty window yields a fully transparent image.
pub fn plot_flux(samples: &[FluxSample], window: &TimeWindow, geometry: &TileGeometry) -> RgbaImage {
    let mut image = RgbaImage::new(geometry.width, geometry.height);
    let window_ms = (window.end - window.start).num_milliseconds();
    if window_ms <= 0 || geometry.width == 0 || geometry.height == 0 {
        return image;
    }

    let columns = geometry.width as usize;
    let mut low = vec![None; columns];
    let mut high = vec![None; columns];

    for sample in samples.iter().filter(|s| window.contains(&s.timestamp)) {
        let offset = (sample.timestamp - window.start).num_milliseconds();
        let column = ((offset as i128 * columns as i128) / window_ms as i128) as usize;
        let column = column.min(columns - 1);
        Span::include(&mut low[column], sample.low_channel);
        Span::include(&mut high[column], sample.high_channel);
    }

    for (column, (low, high)) in low.into_iter().zip(high).enumerate() {
        let x = column as f32;
        if let Some(span) = low {
            draw_span(&mut image, x, span, LOW_CHANNEL_COLOR);
        }
        if let Some(span) = high {
            draw_span(&mut image, x, span, HIGH_CHANNEL_COLOR);
        }
    }

    image
}

/// Vertical pixel row for `flux`, clamped into the image.
pub fn flux_to_row(flux: f32, height: u32) -> f32 {
    let bottom = AXIS_MIN.log10();
    let top = AXIS_MAX.log10();
    let fraction = ((flux.max(f32::MIN_POSITIVE).log10() - bottom) / (top - bottom)).clamp(0.0, 1.0);
    let max_row = height.saturating_sub(1) as f32;
    (max_row - fraction * max_row).round()
}

fn draw_span(image: &mut RgbaImage, x: f32, span: Span, color: Rgba<u8>) {
    let height = image.height();
    let top = flux_to_row(span.max, height);
    let bottom = flux_to_row(span.min, height);
    draw_line_segment_mut(image, (x, top), (x, bottom), color);
}
