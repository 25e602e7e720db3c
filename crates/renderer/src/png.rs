//! PNG container encoding for cache tiles.
//!
//! Supports two encoding modes:
//! - **Indexed PNG (color type 3)**: Used when a tile has ≤256 unique colors,
//!   which is the common case for flux diagrams (two line colors over a
//!   transparent background).
//! - **RGBA PNG (color type 6)**: Fallback for composed tiles whose bilinear
//!   downscale introduced more colors.
//!
//! Every encoder accepts `tEXt` entries, which is how tile metadata travels
//! with the image. [`read_text_chunks`] recovers them without decoding pixels.

use rayon::prelude::*;
use std::collections::HashMap;
use std::io::Write;
use tracing::trace;

/// PNG file signature
pub const PNG_SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

/// Maximum colors for indexed PNG (PNG8)
const MAX_PALETTE_SIZE: usize = 256;

/// Minimum pixels to benefit from parallel palette extraction
const PARALLEL_THRESHOLD: usize = 4096;

/// Longest keyword the PNG specification allows for a `tEXt` chunk
const MAX_KEYWORD_LEN: usize = 79;

/// Colors and per-pixel indices of an image with few distinct colors.
#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    pub colors: Vec<[u8; 4]>,
    pub indices: Vec<u8>,
}

/// Encode RGBA pixels, picking indexed mode when the colors fit a palette.
///
/// # Arguments
/// - `pixels`: RGBA pixel data (4 bytes per pixel)
/// - `width`, `height`: Image size in pixels
/// - `text`: `tEXt` keyword/value pairs to embed
pub fn encode_png(
    pixels: &[u8],
    width: usize,
    height: usize,
    text: &[(String, String)],
) -> Result<Vec<u8>, String> {
    check_buffer(pixels, width, height)?;

    let palette = if width * height >= PARALLEL_THRESHOLD {
        extract_palette_parallel(pixels)
    } else {
        extract_palette(pixels)
    };

    match palette {
        Some(palette) => {
            trace!(colors = palette.colors.len(), "Encoding indexed PNG");
            encode_png_indexed(width, height, &palette, text)
        }
        None => encode_png_rgba(pixels, width, height, text),
    }
}

/// Encode an RGBA PNG (color type 6).
pub fn encode_png_rgba(
    pixels: &[u8],
    width: usize,
    height: usize,
    text: &[(String, String)],
) -> Result<Vec<u8>, String> {
    check_buffer(pixels, width, height)?;

    let mut png = Vec::with_capacity(pixels.len() / 2);
    png.extend_from_slice(&PNG_SIGNATURE);
    write_chunk(&mut png, b"IHDR", &header(width, height, 6));
    write_text_chunks(&mut png, text)?;

    let idat = deflate_scanlines(pixels, width * 4, height)
        .map_err(|e| format!("IDAT compression failed: {}", e))?;
    write_chunk(&mut png, b"IDAT", &idat);
    write_chunk(&mut png, b"IEND", &[]);

    Ok(png)
}

/// Encode an indexed PNG (color type 3) from a palette.
pub fn encode_png_indexed(
    width: usize,
    height: usize,
    palette: &Palette,
    text: &[(String, String)],
) -> Result<Vec<u8>, String> {
    if width == 0 || height == 0 {
        return Err(format!("cannot encode empty {}x{} image", width, height));
    }
    if palette.indices.len() != width * height {
        return Err(format!(
            "palette has {} indices for a {}x{} image",
            palette.indices.len(),
            width,
            height
        ));
    }

    let mut png = Vec::new();
    png.extend_from_slice(&PNG_SIGNATURE);
    write_chunk(&mut png, b"IHDR", &header(width, height, 3));

    let plte: Vec<u8> = palette.colors.iter().flat_map(|c| [c[0], c[1], c[2]]).collect();
    write_chunk(&mut png, b"PLTE", &plte);

    // tRNS only when some entry is not fully opaque
    if palette.colors.iter().any(|c| c[3] < 255) {
        let trns: Vec<u8> = palette.colors.iter().map(|c| c[3]).collect();
        write_chunk(&mut png, b"tRNS", &trns);
    }

    write_text_chunks(&mut png, text)?;

    let idat = deflate_scanlines(&palette.indices, width, height)
        .map_err(|e| format!("IDAT compression failed: {}", e))?;
    write_chunk(&mut png, b"IDAT", &idat);
    write_chunk(&mut png, b"IEND", &[]);

    Ok(png)
}

/// Read every `tEXt` entry of a PNG file, verifying chunk CRCs on the way.
pub fn read_text_chunks(png: &[u8]) -> Result<HashMap<String, String>, String> {
    if png.len() < PNG_SIGNATURE.len() || png[..8] != PNG_SIGNATURE {
        return Err("not a PNG file".to_string());
    }

    let mut entries = HashMap::new();
    let mut offset = PNG_SIGNATURE.len();

    while offset + 12 <= png.len() {
        let len = u32::from_be_bytes([png[offset], png[offset + 1], png[offset + 2], png[offset + 3]])
            as usize;
        let type_start = offset + 4;
        let data_start = type_start + 4;
        let data_end = data_start
            .checked_add(len)
            .filter(|end| end + 4 <= png.len())
            .ok_or_else(|| format!("chunk at byte {} runs past end of file", offset))?;

        let chunk_type = &png[type_start..data_start];
        let data = &png[data_start..data_end];
        let stored_crc = u32::from_be_bytes([
            png[data_end],
            png[data_end + 1],
            png[data_end + 2],
            png[data_end + 3],
        ]);
        if crc32fast::hash(&png[type_start..data_end]) != stored_crc {
            return Err(format!(
                "CRC mismatch in {} chunk",
                String::from_utf8_lossy(chunk_type)
            ));
        }

        match chunk_type {
            b"tEXt" => {
                if let Some(sep) = data.iter().position(|&b| b == 0) {
                    let key = latin1_to_string(&data[..sep]);
                    let value = latin1_to_string(&data[sep + 1..]);
                    entries.insert(key, value);
                }
            }
            b"IEND" => return Ok(entries),
            _ => {}
        }

        offset = data_end + 4;
    }

    Err("missing IEND chunk".to_string())
}

/// Collect the palette sequentially (small images).
pub fn extract_palette(pixels: &[u8]) -> Option<Palette> {
    let mut lookup: HashMap<u32, u8> = HashMap::with_capacity(MAX_PALETTE_SIZE);
    let mut colors: Vec<[u8; 4]> = Vec::with_capacity(MAX_PALETTE_SIZE);
    let mut indices = Vec::with_capacity(pixels.len() / 4);

    for px in pixels.chunks_exact(4) {
        let color = [px[0], px[1], px[2], px[3]];
        let index = match lookup.get(&u32::from_le_bytes(color)) {
            Some(&idx) => idx,
            None => {
                if colors.len() == MAX_PALETTE_SIZE {
                    return None;
                }
                let idx = colors.len() as u8;
                lookup.insert(u32::from_le_bytes(color), idx);
                colors.push(color);
                idx
            }
        };
        indices.push(index);
    }

    Some(Palette { colors, indices })
}

/// Collect the palette with rayon (large images).
///
/// Distinct colors are gathered per chunk first so an image with too many
/// colors bails out before any index is assigned.
pub fn extract_palette_parallel(pixels: &[u8]) -> Option<Palette> {
    let chunk_size = (pixels.len() / 4 / rayon::current_num_threads()).max(256) * 4;

    let per_chunk: Vec<Vec<u32>> = pixels
        .par_chunks(chunk_size)
        .map(|chunk| {
            let mut seen: Vec<u32> = Vec::new();
            let mut set = std::collections::HashSet::with_capacity(MAX_PALETTE_SIZE);
            for px in chunk.chunks_exact(4) {
                let packed = u32::from_le_bytes([px[0], px[1], px[2], px[3]]);
                if set.insert(packed) {
                    seen.push(packed);
                    if seen.len() > MAX_PALETTE_SIZE {
                        break;
                    }
                }
            }
            seen
        })
        .collect();

    let mut lookup: HashMap<u32, u8> = HashMap::with_capacity(MAX_PALETTE_SIZE);
    let mut colors: Vec<[u8; 4]> = Vec::with_capacity(MAX_PALETTE_SIZE);
    for packed in per_chunk.into_iter().flatten() {
        if lookup.contains_key(&packed) {
            continue;
        }
        if colors.len() == MAX_PALETTE_SIZE {
            return None;
        }
        lookup.insert(packed, colors.len() as u8);
        colors.push(packed.to_le_bytes());
    }

    let indices: Vec<u8> = pixels
        .par_chunks_exact(4)
        .map(|px| {
            let packed = u32::from_le_bytes([px[0], px[1], px[2], px[3]]);
            lookup.get(&packed).copied().unwrap_or(0)
        })
        .collect();

    Some(Palette { colors, indices })
}

fn check_buffer(pixels: &[u8], width: usize, height: usize) -> Result<(), String> {
    if width == 0 || height == 0 {
        return Err(format!("cannot encode empty {}x{} image", width, height));
    }
    if pixels.len() != width * height * 4 {
        return Err(format!(
            "expected {} RGBA bytes for {}x{}, got {}",
            width * height * 4,
            width,
            height,
            pixels.len()
        ));
    }
    Ok(())
}

/// IHDR payload: 8-bit depth, no interlace.
fn header(width: usize, height: usize, color_type: u8) -> Vec<u8> {
    let mut ihdr = Vec::with_capacity(13);
    ihdr.extend_from_slice(&(width as u32).to_be_bytes());
    ihdr.extend_from_slice(&(height as u32).to_be_bytes());
    ihdr.extend_from_slice(&[8, color_type, 0, 0, 0]);
    ihdr
}

fn write_text_chunks(png: &mut Vec<u8>, text: &[(String, String)]) -> Result<(), String> {
    for (key, value) in text {
        if key.is_empty() || key.len() > MAX_KEYWORD_LEN || key.contains('\0') {
            return Err(format!("invalid tEXt keyword '{}'", key));
        }
        let mut data = Vec::with_capacity(key.len() + 1 + value.len());
        data.extend(key.chars().map(latin1_byte));
        data.push(0);
        data.extend(value.chars().map(latin1_byte));
        write_chunk(png, b"tEXt", &data);
    }
    Ok(())
}

/// Write a PNG chunk: length, type, data, CRC over type and data.
fn write_chunk(png: &mut Vec<u8>, chunk_type: &[u8; 4], data: &[u8]) {
    png.extend_from_slice(&(data.len() as u32).to_be_bytes());
    let crc_start = png.len();
    png.extend_from_slice(chunk_type);
    png.extend_from_slice(data);
    let crc = crc32fast::hash(&png[crc_start..]);
    png.extend_from_slice(&crc.to_be_bytes());
}

/// Prefix each scanline with filter type 0 and zlib-compress the result.
fn deflate_scanlines(
    data: &[u8],
    row_bytes: usize,
    height: usize,
) -> Result<Vec<u8>, std::io::Error> {
    let mut raw = Vec::with_capacity(height * (1 + row_bytes));
    for row in data.chunks_exact(row_bytes).take(height) {
        raw.push(0);
        raw.extend_from_slice(row);
    }

    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::fast());
    encoder.write_all(&raw)?;
    encoder.finish()
}

fn latin1_byte(c: char) -> u8 {
    u8::try_from(u32::from(c)).unwrap_or(b'?')
}

fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}
