//! SPIR-V shader loading for voxelcast.
//!
//! Shaders are read at runtime from `shaders/spv/<name>.spv`, relative to the
//! working directory. With the `embedded` feature the GLSL sources in this
//! crate are also compiled at build time and available without any files.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Directory searched by [`load_shader`].
pub const SHADER_DIR: &str = "shaders/spv";

/// Name of the voxelization compute shader.
pub const VOXELIZE: &str = "voxelize";

/// Shader loading errors.
#[derive(Error, Debug)]
pub enum ShaderError {
    #[error("Failed to read shader {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("SPIR-V size {0} is not a non-zero multiple of 4 bytes")]
    BadLength(usize),

    #[error("Invalid SPIR-V magic number {0:#010x}")]
    BadMagic(u32),
}

/// Embedded SPIR-V shader bytecode (raw bytes, may not be aligned).
#[cfg(feature = "embedded")]
mod spirv_bytes {
    pub static VOXELIZE_COMP: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/voxelize.spv"));
}

/// Convert a SPIR-V binary into words.
///
/// Words are read in native byte order, the same order Vulkan consumes them.
pub fn bytes_to_spirv(bytes: &[u8]) -> Result<Vec<u32>, ShaderError> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(ShaderError::BadLength(bytes.len()));
    }

    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(&other) => Err(ShaderError::BadMagic(other)),
        None => Err(ShaderError::BadLength(0)),
    }
}

/// Path of the compiled shader `name` inside `dir`.
pub fn spv_path(dir: impl AsRef<Path>, name: &str) -> PathBuf {
    dir.as_ref().join(format!("{name}.spv"))
}

/// Load `<dir>/<name>.spv`.
pub fn load_spirv(dir: impl AsRef<Path>, name: &str) -> Result<Vec<u32>, ShaderError> {
    let path = spv_path(dir, name);
    let bytes = std::fs::read(&path).map_err(|source| ShaderError::Io {
        path: path.clone(),
        source,
    })?;

    let words = bytes_to_spirv(&bytes)?;
    tracing::debug!("Loaded {} ({} words)", path.display(), words.len());
    Ok(words)
}

/// Load `shaders/spv/<name>.spv` from the working directory.
pub fn load_shader(name: &str) -> Result<Vec<u32>, ShaderError> {
    load_spirv(SHADER_DIR, name)
}

/// The voxelization shader compiled into the binary.
#[cfg(feature = "embedded")]
pub fn embedded_voxelize() -> Result<Vec<u32>, ShaderError> {
    bytes_to_spirv(spirv_bytes::VOXELIZE_COMP)
}
