//! Core voxelization types.

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::constants::{LOCAL_SIZE, TEXEL_SIZE};
use crate::error::{Error, Result};
use crate::math::workgroup_count;

/// Dimensions of the voxel grid written by the compute shader.
///
/// `height` is the slicing axis: every height-slice becomes one atlas tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridExtent {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl GridExtent {
    /// Create a new extent.
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Reject extents with a zero axis.
    pub fn validate(self) -> Result<Self> {
        if self.width == 0 || self.height == 0 || self.depth == 0 {
            return Err(Error::InvalidData(format!(
                "grid extent {self} has a zero axis"
            )));
        }
        Ok(self)
    }

    /// Total number of texels.
    pub const fn texel_count(self) -> usize {
        self.width as usize * self.height as usize * self.depth as usize
    }

    /// Size in bytes of the tightly packed RGBA8 grid.
    pub const fn byte_len(self) -> usize {
        self.texel_count() * TEXEL_SIZE
    }

    /// Byte offset of texel `(x, slice, z)` in read-back data.
    #[inline]
    pub const fn texel_offset(self, x: u32, slice: u32, z: u32) -> usize {
        ((z as usize * self.height as usize + slice as usize) * self.width as usize + x as usize)
            * TEXEL_SIZE
    }

    /// Workgroup counts for a dispatch covering the whole grid.
    pub const fn group_counts(self) -> [u32; 3] {
        [
            workgroup_count(self.width, LOCAL_SIZE),
            workgroup_count(self.height, LOCAL_SIZE),
            workgroup_count(self.depth, LOCAL_SIZE),
        ]
    }
}

impl Default for GridExtent {
    fn default() -> Self {
        Self::new(128, 64, 128)
    }
}

impl std::fmt::Display for GridExtent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.depth)
    }
}

impl std::str::FromStr for GridExtent {
    type Err = Error;

    /// Parse `WxHxD`, e.g. `128x64x128`.
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split(['x', 'X']).collect();
        let [w, h, d] = parts.as_slice() else {
            return Err(Error::Config(format!("expected WxHxD, got {s:?}")));
        };
        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .map_err(|e| Error::Config(format!("bad extent axis {v:?}: {e}")))
        };
        Self::new(parse(w)?, parse(h)?, parse(d)?).validate()
    }
}

/// Parameter block read by the voxelization shader.
///
/// This structure must match the uniform block in `voxelize.comp`:
/// ```glsl
/// layout(std140, binding = 3) uniform Params {
///     uint index_count;   // 4 bytes
///     float scale;        // 4 bytes
/// };
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Params {
    /// Number of indices in the index buffer (three per triangle)
    pub index_count: u32,
    /// Shell thickness factor swept by the run loop
    pub scale: f32,
}

impl Params {
    /// Size of the block in bytes.
    pub const SIZE: u32 = std::mem::size_of::<Self>() as u32;

    pub const fn new(index_count: u32, scale: f32) -> Self {
        Self { index_count, scale }
    }
}

/// Triangle mesh in the flat layout uploaded to the storage buffers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    /// Vertex positions
    pub positions: Vec<Vec3>,
    /// Triangle list indices into `positions`
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(positions: Vec<Vec3>, indices: Vec<u32>) -> Self {
        Self { positions, indices }
    }

    /// Both sequences are non-empty.
    pub fn is_valid(&self) -> bool {
        !self.positions.is_empty() && !self.indices.is_empty()
    }

    /// Check the mesh is non-empty and every index is in range.
    pub fn validate(&self) -> Result<()> {
        if !self.is_valid() {
            return Err(Error::MeshLoad(format!(
                "mesh is empty ({} positions, {} indices)",
                self.positions.len(),
                self.indices.len()
            )));
        }

        let vertex_count = self.positions.len();
        if let Some(bad) = self.indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(Error::MeshLoad(format!(
                "index {bad} out of range for {vertex_count} positions"
            )));
        }

        Ok(())
    }

    /// Number of indices, as written into [`Params::index_count`].
    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    /// Positions padded to `vec4` with `w = 0` for std430 storage buffers.
    pub fn padded_positions(&self) -> Vec<Vec4> {
        self.positions.iter().map(|p| p.extend(0.0)).collect()
    }
}
