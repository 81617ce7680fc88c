//! Command buffer management.

use crate::error::{GpuError, Result};
use ash::vk;

/// Names of the submission steps reported in [`GpuError::Command`].
pub mod steps {
    pub const BEGIN: &str = "begin command buffer";
    pub const END: &str = "end command buffer";
    pub const SUBMIT: &str = "submit";
    pub const WAIT_IDLE: &str = "wait idle";
}

/// Command pool with one primary command buffer allocated up front.
///
/// Buffers can be re-recorded individually. Destroying the pool frees every
/// buffer allocated from it.
pub struct CommandPool {
    device: ash::Device,
    pool: vk::CommandPool,
    queue_family: u32,
    primary: vk::CommandBuffer,
}

impl CommandPool {
    /// Create a resettable pool on `queue_family` and allocate its primary buffer.
    pub fn new(device: &ash::Device, queue_family: u32) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.create_command_pool(&create_info, None) }?;

        let mut this = Self {
            device: device.clone(),
            pool,
            queue_family,
            primary: vk::CommandBuffer::null(),
        };
        this.primary = this.allocate_command_buffer()?;

        Ok(this)
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Get the queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// The command buffer allocated with the pool.
    pub fn primary(&self) -> vk::CommandBuffer {
        self.primary
    }

    /// Allocate a single primary command buffer.
    pub fn allocate_command_buffer(&self) -> Result<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }?;
        buffers
            .into_iter()
            .next()
            .ok_or_else(|| GpuError::InvalidState("No command buffer allocated".to_string()))
    }

    /// Return a command buffer to the pool.
    ///
    /// # Safety
    /// The buffer must come from this pool and must not be pending execution.
    pub unsafe fn free_command_buffer(&self, cmd: vk::CommandBuffer) {
        self.device.free_command_buffers(self.pool, &[cmd]);
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.pool, None);
        }
        tracing::trace!("Destroyed command pool");
    }
}

/// Begin recording a command buffer for a single submission.
///
/// # Safety
/// The device and command buffer must be valid and the buffer not pending.
pub unsafe fn begin_one_time(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    let begin_info =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    device
        .begin_command_buffer(cmd, &begin_info)
        .map_err(GpuError::command(steps::BEGIN))
}

/// End recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn end_command_buffer(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    device
        .end_command_buffer(cmd)
        .map_err(GpuError::command(steps::END))
}

/// Submit a recorded command buffer and block until the queue is idle.
///
/// # Safety
/// All handles must be valid.
pub unsafe fn submit_and_wait(
    device: &ash::Device,
    queue: vk::Queue,
    cmd: vk::CommandBuffer,
) -> Result<()> {
    let cmd_buffers = [cmd];
    let submit_info = vk::SubmitInfo::default().command_buffers(&cmd_buffers);

    device
        .queue_submit(queue, &[submit_info], vk::Fence::null())
        .map_err(GpuError::command(steps::SUBMIT))?;
    device
        .queue_wait_idle(queue)
        .map_err(GpuError::command(steps::WAIT_IDLE))
}

/// Record `f` into `cmd`, submit it to `queue` and wait for completion.
///
/// # Safety
/// All handles must be valid and `cmd` must not be pending execution.
pub unsafe fn execute_one_time<F>(
    device: &ash::Device,
    queue: vk::Queue,
    cmd: vk::CommandBuffer,
    f: F,
) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    begin_one_time(device, cmd)?;
    f(cmd);
    end_command_buffer(device, cmd)?;
    submit_and_wait(device, queue, cmd)
}
