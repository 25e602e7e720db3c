//! Shared test utilities for the timelines workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Synthetic flux series and CSV text
//! - Solid-colour tiles and temporary cache directories
//! - An in-memory tile store with failure injection
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```

pub mod fixtures;
pub mod generators;
pub mod memory_store;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use generators::*;
pub use memory_store::InMemoryTileStore;
