//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// Vulkan loader could not be found or loaded.
    #[error("Failed to load Vulkan: {0}")]
    Loading(String),

    /// No physical device exposes a usable compute queue.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Required instance extension not supported.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// Required instance layer not available.
    #[error("Required layer not available: {0}")]
    LayerNotSupported(String),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Shader binary could not be loaded or turned into a module.
    #[error("Shader load failed: {0}")]
    ShaderLoad(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// A step of a command submission failed.
    #[error("Failed to {step}: {result}")]
    Command {
        step: &'static str,
        result: vk::Result,
    },

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Host-side error.
    #[error(transparent)]
    Core(#[from] voxelcast_core::Error),
}

impl GpuError {
    /// Wrap a Vulkan result with the name of the step that produced it.
    pub fn command(step: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::Command { step, result }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_errors_name_the_step() {
        let err = GpuError::command("submit")(vk::Result::ERROR_DEVICE_LOST);
        assert!(matches!(
            err,
            GpuError::Command {
                step: "submit",
                result: vk::Result::ERROR_DEVICE_LOST
            }
        ));
        assert!(err.to_string().starts_with("Failed to submit: "));
    }
}
