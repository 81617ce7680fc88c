//! Headless Vulkan compute layer for voxelcast.
//!
//! This crate provides:
//! - Vulkan instance and compute device management
//! - GPU capability detection
//! - Memory allocation via gpu-allocator
//! - Command buffer helpers for synchronous submission
//! - 3D storage images with host read-back
//! - Compute pipelines with descriptor binding and push constants
//!
//! Every resource borrows the [`GpuContext`] it was created from and frees
//! itself on drop.

pub mod capabilities;
pub mod command;
pub mod compute_shader;
pub mod context;
pub mod descriptors;
pub mod error;
pub mod image;
pub mod instance;
pub mod memory;

pub use capabilities::{GpuCapabilities, GpuVendor};
pub use command::CommandPool;
pub use compute_shader::ComputeShader;
pub use context::{GpuContext, GpuContextBuilder};
pub use descriptors::{DescriptorBindingInfo, DescriptorPool, DescriptorSetLayoutBuilder};
pub use error::{GpuError, Result};
pub use image::Image3D;
pub use instance::Instance;
pub use memory::{GpuAllocator, GpuBuffer};

/// Re-exported so callers can pick memory locations without a direct dependency.
pub use gpu_allocator::MemoryLocation;
