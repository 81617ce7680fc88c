//! Test harness for voxelcast.
//!
//! Provides headless voxelization and atlas regression testing.

pub mod harness;
pub mod meshes;

pub use harness::{ascii_atlas, AtlasRegressionTest, HeadlessVoxelizer};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TestError {
    #[error("GPU error: {0}")]
    Gpu(#[from] voxelcast_gpu::GpuError),
    #[error("Shader error: {0}")]
    Shader(#[from] voxelcast_shaders::ShaderError),
    #[error("Export error: {0}")]
    Export(#[from] voxelcast_render::ExportError),
    #[error("Image comparison failed: {0}")]
    ImageComparison(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, TestError>;

/// Atlas regression test configuration.
#[derive(Debug, Clone)]
pub struct RegressionConfig {
    /// Maximum allowed pixel difference (0.0-1.0).
    pub threshold: f64,
    /// Directory for baseline atlases.
    pub baseline_dir: String,
    /// Directory for test output atlases.
    pub output_dir: String,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.001,
            baseline_dir: "assets/test_data/baselines".to_string(),
            output_dir: "target/test_output".to_string(),
        }
    }
}
