//! GPU context management.

use crate::capabilities::GpuCapabilities;
use crate::command::{self, CommandPool};
use crate::error::{GpuError, Result};
use crate::instance::{select_physical_device, Instance};
use crate::memory::GpuAllocator;
use ash::vk;
use parking_lot::Mutex;
use std::ffi::{c_char, CStr};
use std::ops::Deref;

/// Logical device destroyed on drop.
pub(crate) struct LogicalDevice(ash::Device);

impl Deref for LogicalDevice {
    type Target = ash::Device;

    fn deref(&self) -> &ash::Device {
        &self.0
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            self.0.destroy_device(None);
        }
        tracing::trace!("Destroyed logical device");
    }
}

/// Everything a compute workload needs: instance, device, one compute queue,
/// a command pool and the memory allocator.
///
/// Resources created from the context borrow it, so they are always released
/// before the device.
pub struct GpuContext {
    // Field order is drop order: pool and allocator before the device,
    // the device before the instance
    command_pool: CommandPool,
    allocator: Mutex<GpuAllocator>,
    device: LogicalDevice,
    physical_device: vk::PhysicalDevice,
    capabilities: GpuCapabilities,
    compute_queue_family: u32,
    compute_queue: vk::Queue,
    instance: Instance,
}

impl GpuContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        self.instance.handle()
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get GPU capabilities.
    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Get the compute queue.
    pub fn compute_queue(&self) -> vk::Queue {
        self.compute_queue
    }

    /// Get the compute queue family index.
    pub fn compute_queue_family(&self) -> u32 {
        self.compute_queue_family
    }

    /// Get the command pool.
    pub fn command_pool(&self) -> &CommandPool {
        &self.command_pool
    }

    /// Get access to the GPU allocator.
    pub fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    /// Whether validation messages are routed to the log.
    pub fn validation_enabled(&self) -> bool {
        self.instance.has_debug_messenger()
    }

    /// Record `f` into `cmd`, submit it on the compute queue and wait.
    ///
    /// # Safety
    /// `cmd` must come from this context's command pool and not be pending.
    pub unsafe fn execute(
        &self,
        cmd: vk::CommandBuffer,
        f: impl FnOnce(vk::CommandBuffer),
    ) -> Result<()> {
        command::execute_one_time(&self.device, self.compute_queue, cmd, f)
    }

    /// Wait for device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device
                .device_wait_idle()
                .map_err(GpuError::command(command::steps::WAIT_IDLE))
        }
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        if let Err(e) = self.wait_idle() {
            tracing::warn!("Device did not go idle before teardown: {e}");
        }
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "voxelcast".to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Build the GPU context.
    ///
    /// Anything created before a failing step is released before returning.
    pub fn build(self) -> Result<GpuContext> {
        let instance = Instance::new(&self.app_name, self.enable_validation)?;

        let (physical_device, compute_queue_family) =
            unsafe { select_physical_device(instance.handle()) }?;

        let capabilities = unsafe { GpuCapabilities::query(instance.handle(), physical_device) };
        tracing::info!("Selected GPU: {}", capabilities.summary());
        tracing::debug!("Using compute queue family {compute_queue_family}");

        let device = unsafe {
            create_device(instance.handle(), physical_device, compute_queue_family)
        }?;

        let compute_queue = unsafe { device.get_device_queue(compute_queue_family, 0) };

        let allocator = GpuAllocator::new(instance.handle(), &device, physical_device)?;
        let command_pool = CommandPool::new(&device, compute_queue_family)?;

        Ok(GpuContext {
            command_pool,
            allocator: Mutex::new(allocator),
            device,
            physical_device,
            capabilities,
            compute_queue_family,
            compute_queue,
            instance,
        })
    }
}

/// Device extensions enabled when the physical device exposes them.
fn optional_device_extensions() -> Vec<&'static CStr> {
    // Must be enabled whenever present (MoltenVK)
    vec![c"VK_KHR_portability_subset"]
}

/// Create the logical device with one compute queue.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    compute_queue_family: u32,
) -> Result<LogicalDevice> {
    let queue_priority = 1.0_f32;
    let queue_create_info = vk::DeviceQueueCreateInfo::default()
        .queue_family_index(compute_queue_family)
        .queue_priorities(std::slice::from_ref(&queue_priority));

    let available: Vec<String> = instance
        .enumerate_device_extension_properties(physical_device)?
        .iter()
        .filter_map(|props| props.extension_name_as_c_str().ok())
        .map(|name| name.to_string_lossy().into_owned())
        .collect();

    let extension_names: Vec<*const c_char> = optional_device_extensions()
        .into_iter()
        .filter(|ext| available.iter().any(|a| a.as_str() == ext.to_string_lossy()))
        .map(CStr::as_ptr)
        .collect();

    // Image barriers are recorded with cmd_pipeline_barrier2
    let mut vulkan_1_3_features = vk::PhysicalDeviceVulkan13Features::default()
        .synchronization2(true);

    let mut features2 =
        vk::PhysicalDeviceFeatures2::default().push_next(&mut vulkan_1_3_features);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(std::slice::from_ref(&queue_create_info))
        .enabled_extension_names(&extension_names)
        .push_next(&mut features2);

    let device = instance.create_device(physical_device, &device_create_info, None)?;
    tracing::trace!("Logical device created");

    Ok(LogicalDevice(device))
}
