//! Tile images with their embedded metadata.

use image::{ImageFormat, RgbaImage};
use timelines_common::{TileMetadata, TimelinesError, TimelinesResult};

use crate::png;

/// Encode a tile image, embedding `{zoomLevel, startDate, endDate}`.
pub fn encode_tile(image: &RgbaImage, metadata: &TileMetadata) -> TimelinesResult<Vec<u8>> {
    png::encode_png(
        image.as_raw(),
        image.width() as usize,
        image.height() as usize,
        &metadata.to_text_entries(),
    )
    .map_err(TimelinesError::RenderError)
}

/// Decode a stored tile back into pixels and metadata.
pub fn decode_tile(bytes: &[u8]) -> TimelinesResult<(RgbaImage, TileMetadata)> {
    let entries = png::read_text_chunks(bytes).map_err(TimelinesError::DecodeError)?;
    let metadata = TileMetadata::from_text_entries(&entries)?;
    Ok((decode_image(bytes)?, metadata))
}

/// Decode only the pixels of a PNG.
pub fn decode_image(bytes: &[u8]) -> TimelinesResult<RgbaImage> {
    image::load_from_memory_with_format(bytes, ImageFormat::Png)
        .map(|img| img.to_rgba8())
        .map_err(|e| TimelinesError::DecodeError(e.to_string()))
}
