//! 3D storage image with host read-back.

use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::memory::GpuBuffer;
use ash::vk;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;
use voxelcast_core::GridExtent;

/// RGBA8 3D image written by compute shaders and copied back to the host.
///
/// The image owns a command buffer dedicated to read-back copies.
pub struct Image3D<'ctx> {
    ctx: &'ctx GpuContext,
    image: vk::Image,
    allocation: Option<Allocation>,
    // Null until created in `new`; Drop skips null handles
    view: vk::ImageView,
    copy_cmd: vk::CommandBuffer,
    extent: GridExtent,
    memory_size: u64,
}

impl<'ctx> Image3D<'ctx> {
    pub const FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

    /// Create a device-local 3D storage image covering `extent`.
    pub fn new(ctx: &'ctx GpuContext, extent: GridExtent, name: &str) -> Result<Self> {
        extent.validate()?;

        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_3D)
            .format(Self::FORMAT)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: extent.depth,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let (image, allocation) =
            ctx.allocator()
                .lock()
                .create_image(&create_info, MemoryLocation::GpuOnly, name)?;

        let memory_size = unsafe { ctx.device().get_image_memory_requirements(image) }.size;

        let mut this = Self {
            ctx,
            image,
            allocation: Some(allocation),
            view: vk::ImageView::null(),
            copy_cmd: vk::CommandBuffer::null(),
            extent,
            memory_size,
        };

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_3D)
            .format(Self::FORMAT)
            .subresource_range(Self::subresource_range());
        this.view = unsafe { ctx.device().create_image_view(&view_info, None) }?;

        this.copy_cmd = ctx.command_pool().allocate_command_buffer()?;

        tracing::debug!("Created 3D image {name} ({extent}, {memory_size} bytes)");

        Ok(this)
    }

    /// Single colour mip and layer.
    pub fn subresource_range() -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .base_mip_level(0)
            .level_count(1)
            .base_array_layer(0)
            .layer_count(1)
    }

    /// Get the raw image handle.
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Get the 3D image view.
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn extent(&self) -> GridExtent {
        self.extent
    }

    /// Driver-reported memory requirement of the image, in bytes.
    pub fn memory_size(&self) -> u64 {
        self.memory_size
    }

    /// Copy the image into host memory.
    ///
    /// The image must be in `TRANSFER_SRC_OPTIMAL`. The returned bytes are
    /// tightly packed texels followed by any driver padding, `memory_size()`
    /// bytes in total.
    pub fn read_back(&self) -> Result<Vec<u8>> {
        let staging = GpuBuffer::new(
            self.ctx,
            self.memory_size,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
            "voxel readback staging",
        )?;

        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .image_offset(vk::Offset3D::default())
            .image_extent(vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: self.extent.depth,
            });

        let device = self.ctx.device();
        unsafe {
            self.ctx.execute(self.copy_cmd, |cmd| {
                device.cmd_copy_image_to_buffer(
                    cmd,
                    self.image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    staging.handle(),
                    &[region],
                );
            })
        }?;

        let bytes = staging.read_bytes()?;
        if bytes.is_empty() {
            return Err(GpuError::InvalidState("Read back zero bytes".to_string()));
        }

        tracing::trace!("Read back {} bytes", bytes.len());
        Ok(bytes)
    }
}

impl Drop for Image3D<'_> {
    fn drop(&mut self) {
        let device = self.ctx.device();
        unsafe {
            if self.copy_cmd != vk::CommandBuffer::null() {
                self.ctx.command_pool().free_command_buffer(self.copy_cmd);
            }
            if self.view != vk::ImageView::null() {
                device.destroy_image_view(self.view, None);
            }
        }
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.ctx.allocator().lock().free(allocation) {
                tracing::error!("Failed to free image memory: {e}");
            }
        }
        unsafe {
            device.destroy_image(self.image, None);
        }
    }
}
