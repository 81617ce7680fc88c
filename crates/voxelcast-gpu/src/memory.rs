//! GPU memory management.

use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;

/// GPU memory allocator wrapper.
///
/// Creates buffers and images together with their bound memory. Handles are
/// returned raw; [`GpuBuffer`] and [`crate::Image3D`] own them.
pub struct GpuAllocator {
    allocator: Option<Allocator>,
    device: ash::Device,
}

impl GpuAllocator {
    /// Create a new allocator.
    pub fn new(
        instance: &ash::Instance,
        device: &ash::Device,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;

        Ok(Self {
            allocator: Some(allocator),
            device: device.clone(),
        })
    }

    fn inner(&mut self) -> Result<&mut Allocator> {
        self.allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("Allocator not initialized".to_string()))
    }

    /// Create a buffer and bind freshly allocated memory to it.
    pub fn create_buffer(
        &mut self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<(vk::Buffer, Allocation)> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }?;
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        match self.allocate_and_bind(name, requirements, location, true, |device, alloc| unsafe {
            device.bind_buffer_memory(buffer, alloc.memory(), alloc.offset())
        }) {
            Ok(allocation) => Ok((buffer, allocation)),
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                Err(e)
            }
        }
    }

    /// Create an image and bind freshly allocated memory to it.
    pub fn create_image(
        &mut self,
        create_info: &vk::ImageCreateInfo,
        location: MemoryLocation,
        name: &str,
    ) -> Result<(vk::Image, Allocation)> {
        let image = unsafe { self.device.create_image(create_info, None) }?;
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        match self.allocate_and_bind(name, requirements, location, false, |device, alloc| unsafe {
            device.bind_image_memory(image, alloc.memory(), alloc.offset())
        }) {
            Ok(allocation) => Ok((image, allocation)),
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                Err(e)
            }
        }
    }

    fn allocate_and_bind(
        &mut self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
        bind: impl FnOnce(&ash::Device, &Allocation) -> std::result::Result<(), vk::Result>,
    ) -> Result<Allocation> {
        let allocation = self
            .inner()?
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| GpuError::AllocationFailed(format!("{name}: {e}")))?;

        if let Err(e) = bind(&self.device, &allocation) {
            self.free(allocation)?;
            return Err(e.into());
        }

        Ok(allocation)
    }

    /// Return an allocation to the allocator.
    pub fn free(&mut self, allocation: Allocation) -> Result<()> {
        self.inner()?
            .free(allocation)
            .map_err(|e| GpuError::AllocationFailed(e.to_string()))
    }

    /// Shutdown the allocator, freeing all GPU memory.
    ///
    /// This must be called before the Vulkan device is destroyed.
    /// Any remaining allocations will be freed (and logged as leaks).
    pub fn shutdown(&mut self) {
        if let Some(allocator) = self.allocator.take() {
            drop(allocator);
        }
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A buffer with its bound memory, released on drop.
pub struct GpuBuffer<'ctx> {
    ctx: &'ctx GpuContext,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: u64,
}

impl<'ctx> GpuBuffer<'ctx> {
    /// Create a buffer of `size` bytes.
    pub fn new(
        ctx: &'ctx GpuContext,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<Self> {
        if size == 0 {
            return Err(GpuError::InvalidState(format!("Buffer {name} has zero size")));
        }

        let (buffer, allocation) = ctx
            .allocator()
            .lock()
            .create_buffer(size, usage, location, name)?;

        tracing::trace!("Created buffer {name} ({size} bytes, {location:?})");

        Ok(Self {
            ctx,
            buffer,
            allocation: Some(allocation),
            size,
        })
    }

    /// Create a host-visible buffer holding `data`.
    pub fn with_data<T: bytemuck::Pod>(
        ctx: &'ctx GpuContext,
        data: &[T],
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mut buffer = Self::new(
            ctx,
            bytes.len() as u64,
            usage,
            MemoryLocation::CpuToGpu,
            name,
        )?;
        buffer.write_bytes(0, bytes)?;
        Ok(buffer)
    }

    /// Get the raw buffer handle.
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size requested at creation, in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    fn mapped_mut(&mut self) -> Result<&mut [u8]> {
        let size = self.size as usize;
        self.allocation
            .as_mut()
            .and_then(Allocation::mapped_slice_mut)
            .map(|slice| &mut slice[..size])
            .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))
    }

    /// Write typed data at the start of the buffer (must be host-visible).
    pub fn write<T: bytemuck::Pod>(&mut self, data: &[T]) -> Result<()> {
        self.write_bytes(0, bytemuck::cast_slice(data))
    }

    /// Write raw bytes at `offset` (must be host-visible).
    pub fn write_bytes(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| GpuError::InvalidState("Offset overflow".to_string()))?;
        if end > self.size {
            return Err(GpuError::InvalidState(format!(
                "Write of {} bytes at {offset} exceeds buffer size {}",
                data.len(),
                self.size
            )));
        }

        self.mapped_mut()?[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    /// Copy the whole buffer into host memory (must be host-visible).
    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        let size = self.size as usize;
        self.allocation
            .as_ref()
            .and_then(Allocation::mapped_slice)
            .map(|slice| slice[..size].to_vec())
            .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))
    }
}

impl Drop for GpuBuffer<'_> {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.ctx.allocator().lock().free(allocation) {
                tracing::error!("Failed to free buffer memory: {e}");
            }
        }
        unsafe {
            self.ctx.device().destroy_buffer(self.buffer, None);
        }
    }
}
