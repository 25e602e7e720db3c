//! Derivation of a coarser tile from two finer ones.
//!
//! The two level `L-1` tiles covering `[t, t + 2·d)` are laid side by side on
//! a canvas of twice the tile width, which is then scaled back to the tile
//! width with bilinear filtering. Halving the pixels per second this way is
//! what makes level `L` cover twice the time of level `L-1`.
//!
//! Scaling runs on premultiplied alpha, so transparent pixels next to a
//! plotted line lower its opacity without darkening its colour.

use image::imageops::{self, FilterType};
use image::{Rgba, Rgba32FImage, RgbaImage};
use rayon::prelude::*;
use timelines_common::{TileGeometry, TimelinesError, TimelinesResult, ZoomRange};

/// Minimum pixel count before the alpha pass runs on the rayon pool.
const PARALLEL_ALPHA_THRESHOLD: usize = 64 * 1024;

/// Parameters shared by every composition of one pyramid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComposeOptions {
    pub geometry: TileGeometry,
    /// Multiplier applied to the alpha channel of each composed tile
    pub alpha_factor: f32,
}

impl ComposeOptions {
    pub fn new(geometry: TileGeometry, alpha_factor: f32) -> Self {
        Self {
            geometry,
            alpha_factor,
        }
    }
}

/// Alpha multiplier derived from the cached zoom range.
///
/// Computed as `1 + 1 / (max - min)` in integer arithmetic, so it is `1` for
/// any range spanning more than one step and `2` for a range of exactly one.
/// A single-level range never composes; it yields `1`.
pub fn overlay_alpha_factor(zoom: &ZoomRange) -> f32 {
    match zoom.span() {
        0 => 1.0,
        span => (1 + 1 / span) as f32,
    }
}

/// A fully transparent tile, used in place of a right neighbour that lies in
/// the future.
pub fn blank_tile(geometry: &TileGeometry) -> RgbaImage {
    RgbaImage::new(geometry.width, geometry.height)
}

/// Compose the next-level tile from `left` and an optional `right`.
pub fn compose(
    left: &RgbaImage,
    right: Option<&RgbaImage>,
    options: &ComposeOptions,
) -> TimelinesResult<RgbaImage> {
    let TileGeometry { width, height } = options.geometry;

    for (side, image) in [("left", Some(left)), ("right", right)] {
        if let Some(message) = image.and_then(|img| dimension_mismatch(side, img, &options.geometry)) {
            return Err(TimelinesError::ComposeError(message));
        }
    }

    let mut canvas = RgbaImage::new(width * 2, height);
    imageops::replace(&mut canvas, left, 0, 0);
    if let Some(right) = right {
        imageops::replace(&mut canvas, right, i64::from(width), 0);
    }

    let scaled = imageops::resize(&premultiplied(&canvas), width, height, FilterType::Triangle);
    let mut scaled = unpremultiplied(&scaled);
    multiply_alpha(&mut scaled, options.alpha_factor);

    Ok(scaled)
}

/// Scale every alpha value by `factor`, saturating at fully opaque.
pub fn multiply_alpha(image: &mut RgbaImage, factor: f32) {
    if factor == 1.0 {
        return;
    }

    let scale = |px: &mut [u8]| {
        px[3] = (f32::from(px[3]) * factor).round().clamp(0.0, 255.0) as u8;
    };

    let pixels: &mut [u8] = image;
    if pixels.len() / 4 >= PARALLEL_ALPHA_THRESHOLD {
        pixels.par_chunks_exact_mut(4).for_each(scale);
    } else {
        pixels.chunks_exact_mut(4).for_each(scale);
    }
}

/// Describes how `image` differs from the tile size, or `None` if it fits.
pub fn dimension_mismatch(what: &str, image: &RgbaImage, geometry: &TileGeometry) -> Option<String> {
    if image.dimensions() == (geometry.width, geometry.height) {
        return None;
    }
    Some(format!(
        "{} tile is {}x{}, expected {}x{}",
        what,
        image.width(),
        image.height(),
        geometry.width,
        geometry.height
    ))
}

fn premultiplied(image: &RgbaImage) -> Rgba32FImage {
    Rgba32FImage::from_fn(image.width(), image.height(), |x, y| {
        let Rgba([r, g, b, a]) = *image.get_pixel(x, y);
        let alpha = f32::from(a) / 255.0;
        let channel = |v: u8| f32::from(v) / 255.0 * alpha;
        Rgba([channel(r), channel(g), channel(b), alpha])
    })
}

fn unpremultiplied(image: &Rgba32FImage) -> RgbaImage {
    RgbaImage::from_fn(image.width(), image.height(), |x, y| {
        let Rgba([r, g, b, a]) = *image.get_pixel(x, y);
        let alpha = (a.clamp(0.0, 1.0) * 255.0).round();
        if alpha < 1.0 {
            return Rgba([0, 0, 0, 0]);
        }
        let channel = |v: f32| ((v / a).clamp(0.0, 1.0) * 255.0).round() as u8;
        Rgba([channel(r), channel(g), channel(b), alpha as u8])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

    fn options(width: u32, height: u32) -> ComposeOptions {
        ComposeOptions::new(TileGeometry::new(width, height), 1.0)
    }

    #[test]
    fn test_alpha_factor_integer_division() {
        assert_eq!(overlay_alpha_factor(&ZoomRange::new(8, 8).unwrap()), 1.0);
        assert_eq!(overlay_alpha_factor(&ZoomRange::new(8, 9).unwrap()), 2.0);
        assert_eq!(overlay_alpha_factor(&ZoomRange::new(8, 10).unwrap()), 1.0);
        assert_eq!(overlay_alpha_factor(&ZoomRange::new(8, 30).unwrap()), 1.0);
    }

    #[test]
    fn test_compose_keeps_tile_size() {
        let left = RgbaImage::from_pixel(40, 10, RED);
        let right = RgbaImage::from_pixel(40, 10, BLUE);

        let out = compose(&left, Some(&right), &options(40, 10)).unwrap();
        assert_eq!(out.dimensions(), (40, 10));
    }

    #[test]
    fn test_compose_places_left_then_right() {
        let left = RgbaImage::from_pixel(40, 10, RED);
        let right = RgbaImage::from_pixel(40, 10, BLUE);

        let out = compose(&left, Some(&right), &options(40, 10)).unwrap();
        assert_eq!(*out.get_pixel(0, 5), RED);
        assert_eq!(*out.get_pixel(39, 5), BLUE);
    }

    #[test]
    fn test_compose_pads_missing_right_with_transparency() {
        let left = RgbaImage::from_pixel(40, 10, RED);

        let out = compose(&left, None, &options(40, 10)).unwrap();
        assert_eq!(*out.get_pixel(0, 0), RED);
        assert_eq!(out.get_pixel(39, 0)[3], 0);
    }

    #[test]
    fn test_compose_keeps_colour_at_transparent_edge() {
        let mut left = RgbaImage::new(40, 10);
        for y in 0..10 {
            left.put_pixel(19, y, RED);
            left.put_pixel(20, y, RED);
        }

        let out = compose(&left, None, &options(40, 10)).unwrap();
        let edge = out.pixels().filter(|p| p[3] > 0 && p[3] < 255).count();
        assert!(edge > 0);
        for p in out.pixels().filter(|p| p[3] > 0) {
            assert_eq!((p[0], p[1], p[2]), (255, 0, 0), "darkened pixel {:?}", p);
        }
    }

    #[test]
    fn test_dimension_mismatch_message() {
        let geometry = TileGeometry::new(40, 10);
        assert_eq!(dimension_mismatch("base", &RgbaImage::new(40, 10), &geometry), None);
        assert_eq!(
            dimension_mismatch("base", &RgbaImage::new(7, 3), &geometry).as_deref(),
            Some("base tile is 7x3, expected 40x10")
        );
    }

    #[test]
    fn test_compose_rejects_mismatched_sources() {
        let left = RgbaImage::from_pixel(40, 10, RED);
        let small = RgbaImage::from_pixel(20, 10, BLUE);

        assert!(compose(&small, None, &options(40, 10)).is_err());
        assert!(matches!(
            compose(&left, Some(&small), &options(40, 10)),
            Err(TimelinesError::ComposeError(_))
        ));
    }

    #[test]
    fn test_multiply_alpha_saturates() {
        let mut img = RgbaImage::from_pixel(2, 1, Rgba([10, 20, 30, 100]));
        img.put_pixel(1, 0, Rgba([10, 20, 30, 200]));

        multiply_alpha(&mut img, 2.0);
        assert_eq!(*img.get_pixel(0, 0), Rgba([10, 20, 30, 200]));
        assert_eq!(*img.get_pixel(1, 0), Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn test_multiply_alpha_large_image() {
        let mut img = RgbaImage::from_pixel(512, 256, Rgba([1, 2, 3, 60]));
        multiply_alpha(&mut img, 2.0);
        assert!(img.pixels().all(|p| p[3] == 120));
    }
}
