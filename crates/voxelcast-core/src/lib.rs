//! Core types, math, and host-side transforms for voxelcast.
//!
//! This crate provides the pieces that never touch the GPU:
//! - Voxel grid extents and the shader parameter block
//! - Workgroup and atlas grid math
//! - Slice-to-atlas rearrangement of read-back voxel data
//! - OBJ mesh loading
//! - Common error types

pub mod atlas;
pub mod error;
pub mod math;
pub mod mesh;
pub mod types;

pub use atlas::{rearrange, AtlasLayout};
pub use error::{Error, Result};
pub use mesh::load_obj;
pub use types::{GridExtent, MeshData, Params};

/// Crate-wide constants
pub mod constants {
    /// Local workgroup size of the voxelization shader on every axis
    pub const LOCAL_SIZE: u32 = 8;
    /// Bytes per RGBA8 texel
    pub const TEXEL_SIZE: usize = 4;
}
