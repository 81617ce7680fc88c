//! Slice-to-atlas rearrangement.
//!
//! Read-back voxel data is laid out slice-interleaved: texel `(x, slice, z)`
//! lives at `((z * height + slice) * width + x) * 4`. To make it viewable as
//! a single PNG, every height-slice is copied into its own `width x depth`
//! tile of a square tile grid, row-major.

use crate::constants::TEXEL_SIZE;
use crate::error::{Error, Result};
use crate::math::grid_side;
use crate::types::GridExtent;

/// Geometry of the tiled atlas for a given voxel grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AtlasLayout {
    pub extent: GridExtent,
    /// Tiles per atlas row and column
    pub grid_side: u32,
}

impl AtlasLayout {
    pub const fn new(extent: GridExtent) -> Self {
        Self {
            extent,
            grid_side: grid_side(extent.height),
        }
    }

    /// Atlas width in pixels.
    pub const fn width_px(&self) -> u32 {
        self.extent.width * self.grid_side
    }

    /// Atlas height in pixels.
    pub const fn height_px(&self) -> u32 {
        self.extent.depth * self.grid_side
    }

    /// Atlas size in bytes (RGBA8).
    pub const fn byte_len(&self) -> usize {
        self.width_px() as usize * self.height_px() as usize * TEXEL_SIZE
    }

    /// Top-left pixel of the tile holding `slice`.
    pub const fn tile_origin(&self, slice: u32) -> (u32, u32) {
        (
            (slice % self.grid_side) * self.extent.width,
            (slice / self.grid_side) * self.extent.depth,
        )
    }

    /// Byte offset of atlas pixel `(px, py)`.
    #[inline]
    pub const fn pixel_offset(&self, px: u32, py: u32) -> usize {
        (py as usize * self.width_px() as usize + px as usize) * TEXEL_SIZE
    }
}

/// Rearrange read-back voxel bytes into a zero-initialised tiled atlas.
///
/// `voxels` may be longer than `extent.byte_len()`; drivers are free to pad
/// the image allocation and the tail is ignored. Tiles past the last slice
/// stay black.
pub fn rearrange(voxels: &[u8], extent: GridExtent) -> Result<Vec<u8>> {
    let expected = extent.byte_len();
    if voxels.len() < expected {
        return Err(Error::InvalidData(format!(
            "voxel data for {extent} needs {expected} bytes, got {}",
            voxels.len()
        )));
    }

    let layout = AtlasLayout::new(extent);
    let mut atlas = vec![0u8; layout.byte_len()];
    let row_bytes = extent.width as usize * TEXEL_SIZE;

    for slice in 0..extent.height {
        let (tile_x, tile_y) = layout.tile_origin(slice);

        // A row of one slice is contiguous in both layouts, so copy whole rows
        for z in 0..extent.depth {
            let src = extent.texel_offset(0, slice, z);
            let dst = layout.pixel_offset(tile_x, tile_y + z);
            atlas[dst..dst + row_bytes].copy_from_slice(&voxels[src..src + row_bytes]);
        }
    }

    Ok(atlas)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Texel `(x, slice, z)` = `(x, slice, z, 255)` modulo 256.
    fn synthetic_grid(extent: GridExtent) -> Vec<u8> {
        let mut data = vec![0u8; extent.byte_len()];
        for z in 0..extent.depth {
            for slice in 0..extent.height {
                for x in 0..extent.width {
                    let i = extent.texel_offset(x, slice, z);
                    data[i..i + 4].copy_from_slice(&[x as u8, slice as u8, z as u8, 255]);
                }
            }
        }
        data
    }

    #[test]
    fn layout_for_reference_extent() {
        let layout = AtlasLayout::new(GridExtent::new(128, 64, 128));
        assert_eq!(layout.grid_side, 8);
        assert_eq!((layout.width_px(), layout.height_px()), (1024, 1024));
        assert_eq!(layout.tile_origin(0), (0, 0));
        assert_eq!(layout.tile_origin(7), (896, 0));
        assert_eq!(layout.tile_origin(9), (128, 128));
    }

    #[test]
    fn tile_content_for_reference_extent() {
        let extent = GridExtent::new(128, 64, 128);
        let layout = AtlasLayout::new(extent);
        let atlas = rearrange(&synthetic_grid(extent), extent).unwrap();
        assert_eq!(atlas.len(), 1024 * 1024 * 4);

        // slice 9 starts at (128, 128)
        let i = layout.pixel_offset(128, 128);
        assert_eq!(&atlas[i..i + 4], &[0, 9, 0, 255]);

        let i = layout.pixel_offset(128 + 5, 128 + 17);
        assert_eq!(&atlas[i..i + 4], &[5, 9, 17, 255]);
    }

    #[test]
    fn every_source_byte_lands_once() {
        let extent = GridExtent::new(3, 5, 2);
        let layout = AtlasLayout::new(extent);
        assert_eq!(layout.grid_side, 3);

        // Unique non-zero marker per source texel
        let mut voxels = vec![0u8; extent.byte_len()];
        for (i, texel) in voxels.chunks_exact_mut(4).enumerate() {
            texel.copy_from_slice(&((i as u32 + 1).to_le_bytes()));
        }

        let atlas = rearrange(&voxels, extent).unwrap();
        assert_eq!(atlas.len(), layout.byte_len());

        let mut seen = vec![0u32; extent.texel_count()];
        let mut untouched = 0;
        for texel in atlas.chunks_exact(4) {
            let marker = u32::from_le_bytes([texel[0], texel[1], texel[2], texel[3]]);
            if marker == 0 {
                untouched += 1;
            } else {
                seen[marker as usize - 1] += 1;
            }
        }

        assert!(seen.iter().all(|&count| count == 1));
        // 9 tiles, 5 used, 4 of 3x2 pixels untouched
        assert_eq!(untouched, 4 * 3 * 2);
    }

    #[test]
    fn unused_tiles_stay_black() {
        let extent = GridExtent::new(2, 2, 2);
        let layout = AtlasLayout::new(extent);
        let voxels = vec![0xFF; extent.byte_len()];
        let atlas = rearrange(&voxels, extent).unwrap();

        // grid_side = 2, slices 0 and 1 fill the top row only
        let (bottom_left, bottom_y) = (0, 2);
        let start = layout.pixel_offset(bottom_left, bottom_y);
        assert!(atlas[start..].iter().all(|&b| b == 0));
        assert!(atlas[..start].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn single_slice_is_identity_layout() {
        let extent = GridExtent::new(4, 1, 3);
        let voxels = synthetic_grid(extent);
        let atlas = rearrange(&voxels, extent).unwrap();
        assert_eq!(atlas, voxels);
    }

    #[test]
    fn padded_input_is_accepted() {
        let extent = GridExtent::new(2, 2, 2);
        let mut voxels = synthetic_grid(extent);
        let expected = rearrange(&voxels, extent).unwrap();
        voxels.extend_from_slice(&[0xAB; 64]);
        assert_eq!(rearrange(&voxels, extent).unwrap(), expected);
    }

    #[test]
    fn short_input_is_rejected() {
        let extent = GridExtent::new(2, 2, 2);
        let voxels = vec![0u8; extent.byte_len() - 1];
        assert!(matches!(
            rearrange(&voxels, extent),
            Err(Error::InvalidData(_))
        ));
    }
}
