//! Atlas export to PNG.
//!
//! Read-back voxel bytes are rearranged into the tiled atlas and written
//! vertically flipped, so slice 0 ends up along the bottom edge.

use std::path::{Path, PathBuf};

use image::{imageops, ImageBuffer, ImageFormat, Rgba, RgbaImage};
use thiserror::Error;
use tracing::info;
use voxelcast_core::{rearrange, AtlasLayout, GridExtent};

/// Errors that can occur while exporting an atlas.
#[derive(Error, Debug)]
pub enum ExportError {
    /// Voxel data could not be rearranged.
    #[error("Failed to build atlas: {0}")]
    Atlas(#[from] voxelcast_core::Error),
    /// Pixel data was the wrong size for the atlas.
    #[error("Invalid image data")]
    InvalidImageData,
    /// Failed to write the PNG.
    #[error("Failed to save atlas: {0}")]
    SaveFailed(#[from] image::ImageError),
}

/// Output path for 1-based iteration `index`.
///
/// `{}` in `pattern` is replaced by the index zero-padded to two digits; a
/// pattern without a placeholder is used as-is.
pub fn output_path(pattern: &str, index: usize) -> PathBuf {
    PathBuf::from(pattern.replace("{}", &format!("{index:02}")))
}

/// Rearrange voxel bytes into a flipped atlas image.
pub fn atlas_image(voxels: &[u8], extent: GridExtent) -> Result<RgbaImage, ExportError> {
    let layout = AtlasLayout::new(extent);
    let atlas = rearrange(voxels, extent)?;

    let image = ImageBuffer::<Rgba<u8>, _>::from_raw(layout.width_px(), layout.height_px(), atlas)
        .ok_or(ExportError::InvalidImageData)?;

    Ok(imageops::flip_vertical(&image))
}

/// Rearrange voxel bytes and write them to `path` as a PNG.
pub fn save_atlas(
    voxels: &[u8],
    extent: GridExtent,
    path: impl AsRef<Path>,
) -> Result<(), ExportError> {
    let path = path.as_ref();
    let image = atlas_image(voxels, extent)?;

    image.save_with_format(path, ImageFormat::Png)?;

    info!(
        "Atlas saved: {} ({}x{})",
        path.display(),
        image.width(),
        image.height()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_path_pads_index() {
        assert_eq!(output_path("output_{}.png", 1), PathBuf::from("output_01.png"));
        assert_eq!(output_path("output_{}.png", 10), PathBuf::from("output_10.png"));
        assert_eq!(output_path("out/{}.png", 123), PathBuf::from("out/123.png"));
    }

    #[test]
    fn output_path_without_placeholder() {
        assert_eq!(output_path("output.png", 3), PathBuf::from("output.png"));
    }

    #[test]
    fn atlas_is_flipped_vertically() {
        // 1 wide, 1 slice, 2 deep: row z=0 is red, row z=1 is green
        let extent = GridExtent::new(1, 1, 2);
        let voxels = [255, 0, 0, 255, 0, 255, 0, 255];

        let image = atlas_image(&voxels, extent).unwrap();
        assert_eq!(image.dimensions(), (1, 2));
        assert_eq!(image.get_pixel(0, 0), &Rgba([0, 255, 0, 255]));
        assert_eq!(image.get_pixel(0, 1), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn short_data_is_rejected() {
        let extent = GridExtent::new(2, 2, 2);
        assert!(matches!(
            atlas_image(&[0; 4], extent),
            Err(ExportError::Atlas(_))
        ));
    }

    #[test]
    fn saved_png_decodes_to_atlas() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("atlas.png");

        let extent = GridExtent::new(4, 5, 3);
        let voxels: Vec<u8> = (0..extent.byte_len()).map(|i| (i % 251) as u8).collect();
        save_atlas(&voxels, extent, &path).unwrap();

        let decoded = image::open(&path).unwrap().to_rgba8();
        // grid_side = 3
        assert_eq!(decoded.dimensions(), (12, 9));
        assert_eq!(decoded, atlas_image(&voxels, extent).unwrap());
    }
}
