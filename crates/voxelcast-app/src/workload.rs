//! The voxelizer as a [`Workload`].

use std::path::Path;

use anyhow::Context;
use voxelcast_core::GridExtent;
use voxelcast_gpu::{GpuContext, GpuError};
use voxelcast_render::{save_atlas, Voxelizer};

use crate::config::RunConfig;
use crate::runner::Workload;

/// Load the configured shader from `shaders/spv/`.
///
/// With the `embedded-shaders` feature a missing `voxelize.spv` falls back to
/// the copy compiled into the binary.
pub fn load_shader(name: &str) -> Result<Vec<u32>, GpuError> {
    let loaded = voxelcast_shaders::load_shader(name);

    #[cfg(feature = "embedded-shaders")]
    let loaded = match loaded {
        Err(voxelcast_shaders::ShaderError::Io { path, .. })
            if name == voxelcast_shaders::VOXELIZE =>
        {
            tracing::info!("{} not found, using embedded shader", path.display());
            voxelcast_shaders::embedded_voxelize()
        }
        other => other,
    };

    loaded.map_err(|e| GpuError::ShaderLoad(e.to_string()))
}

/// Voxelizes the configured mesh and writes atlases as PNG.
pub struct VoxelWorkload<'ctx> {
    voxelizer: Voxelizer<'ctx>,
}

impl<'ctx> VoxelWorkload<'ctx> {
    /// Load the shader and mesh and create every GPU resource.
    pub fn new(ctx: &'ctx GpuContext, config: &RunConfig) -> anyhow::Result<Self> {
        let spirv = load_shader(&config.shader).context("Failed to load compute shader")?;
        let voxelizer = Voxelizer::new(ctx, &spirv, config.extent(), &config.mesh)
            .with_context(|| format!("Failed to set up voxelizer for {}", config.mesh.display()))?;
        Ok(Self { voxelizer })
    }

    pub fn extent(&self) -> GridExtent {
        self.voxelizer.extent()
    }

    pub fn voxelizer(&self) -> &Voxelizer<'ctx> {
        &self.voxelizer
    }
}

impl Workload for VoxelWorkload<'_> {
    fn set_scale(&mut self, scale: f32) -> anyhow::Result<()> {
        Ok(self.voxelizer.set_scale(scale)?)
    }

    fn dispatch(&mut self) -> anyhow::Result<()> {
        self.voxelizer.dispatch().context("Compute dispatch failed")
    }

    fn read_back(&mut self) -> anyhow::Result<Vec<u8>> {
        self.voxelizer.read_back().context("Image read-back failed")
    }

    fn encode(&mut self, data: &[u8], path: &Path) -> anyhow::Result<()> {
        save_atlas(data, self.extent(), path)
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(feature = "embedded-shaders"))]
    fn missing_shader_is_a_load_error() {
        let err = load_shader("definitely_not_a_shader").unwrap_err();
        assert!(matches!(err, GpuError::ShaderLoad(_)));
        assert!(err.to_string().contains("definitely_not_a_shader.spv"));
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn bad_mesh_fails_initialization() {
        let ctx = voxelcast_gpu::GpuContextBuilder::new()
            .validation(false)
            .build()
            .unwrap();
        let config = RunConfig {
            mesh: "does/not/exist.obj".into(),
            ..RunConfig::default()
        };
        assert!(VoxelWorkload::new(&ctx, &config).is_err());
    }
}
