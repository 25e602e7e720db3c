//! Image work for the diagram tile cache.
//!
//! - PNG encoding with embedded text metadata
//! - Tile decoding
//! - Composition of coarser tiles from finer ones
//! - Flux plotting for the base level

pub mod codec;
pub mod compose;
pub mod diagram;
pub mod png;

pub use codec::{decode_image, decode_tile, encode_tile};
pub use compose::{
    blank_tile, compose, dimension_mismatch, multiply_alpha, overlay_alpha_factor, ComposeOptions,
};
pub use diagram::plot_flux;
