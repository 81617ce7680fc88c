//! Mesh voxelization and atlas export for voxelcast.
//!
//! This crate provides:
//! - The voxelizer: grid image, mesh buffers and the dispatch sequence
//! - Atlas export to vertically flipped PNG files

pub mod export;
pub mod voxelizer;

pub use export::{atlas_image, output_path, save_atlas, ExportError};
pub use voxelizer::{Voxelizer, BINDINGS};
