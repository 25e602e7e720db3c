//! Multi-resolution tile pyramid of flux diagrams.
//!
//! The finest level is rendered from samples by a [`DiagramSource`]; every
//! coarser level is composed from the two tiles below it, doubling the time
//! span per tile at each step. [`PyramidBuilder::create_cache`] builds the
//! whole pyramid and [`PyramidBuilder::update_cache`] extends it, rebuilding
//! the newest tile of each level on the way.

pub mod builder;
pub mod config;
pub mod report;
pub mod source;

pub use builder::PyramidBuilder;
pub use config::PyramidConfig;
pub use report::{LevelReport, SweepKind, SweepReport};
pub use source::{DiagramSource, SampleDiagramSource};
