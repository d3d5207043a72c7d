//! Command buffer management.

use crate::context::DeviceContext;
use crate::error::{GpuError, Result};
use ash::vk;
use std::sync::Arc;

/// Command pool for allocating command buffers.
pub struct CommandPool {
    device: Arc<ash::Device>,
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// Create a pool whose buffers can be reset individually.
    pub fn new(device: &DeviceContext, queue_family: u32) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        // SAFETY: queue family was resolved for this device
        let pool = unsafe { device.device().create_command_pool(&create_info, None) }?;

        Ok(Self {
            device: device.shared_device(),
            pool,
            queue_family,
        })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Get the queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocate primary command buffers.
    pub fn allocate_command_buffers(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        // SAFETY: pool belongs to this device
        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }?;
        Ok(buffers)
    }

    /// Free command buffers allocated from this pool.
    ///
    /// # Safety
    /// The buffers must not be pending execution.
    pub unsafe fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]) {
        unsafe { self.device.free_command_buffers(self.pool, buffers) };
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        // SAFETY: owners drop the pool only once the device is idle
        unsafe { self.device.destroy_command_pool(self.pool, None) };
    }
}

/// Reset a command buffer and begin recording.
///
/// # Safety
/// The command buffer must not be pending execution.
pub unsafe fn begin_command_buffer(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    flags: vk::CommandBufferUsageFlags,
) -> Result<()> {
    unsafe {
        device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
        device.begin_command_buffer(cmd, &begin_info)?;
    }
    Ok(())
}

/// End recording a command buffer.
///
/// # Safety
/// The command buffer must be in the recording state.
pub unsafe fn end_command_buffer(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    unsafe { device.end_command_buffer(cmd) }?;
    Ok(())
}

/// Record, submit and wait for a one-off command buffer on `queue`.
pub fn execute_single_time_commands<F>(
    device: &DeviceContext,
    pool: &CommandPool,
    queue: vk::Queue,
    f: F,
) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    let cmd = pool.allocate_command_buffers(1)?[0];
    let vk_device = device.device();

    let result = (|| {
        // SAFETY: cmd was just allocated and is not in use
        unsafe {
            begin_command_buffer(vk_device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
            f(cmd);
            end_command_buffer(vk_device, cmd)?;

            let cmd_buffers = [cmd];
            let submit_info = vk::SubmitInfo::default().command_buffers(&cmd_buffers);
            vk_device.queue_submit(queue, &[submit_info], vk::Fence::null())?;
            vk_device.queue_wait_idle(queue)?;
        }
        Ok(())
    })();

    // SAFETY: the queue is idle, or the submission never happened
    unsafe { pool.free_command_buffers(&[cmd]) };

    result
}

/// Access masks and pipeline stages for one image layout transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

impl LayoutTransition {
    /// Barrier parameters for `old -> new`; unrecognised pairs are rejected.
    pub fn between(old: vk::ImageLayout, new: vk::ImageLayout) -> Result<Self> {
        match (old, new) {
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL) => Ok(Self {
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::SHADER_WRITE | vk::AccessFlags::SHADER_READ,
                src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst_stage: vk::PipelineStageFlags::COMPUTE_SHADER
                    | vk::PipelineStageFlags::FRAGMENT_SHADER,
            }),
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Ok(Self {
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::TRANSFER_WRITE,
                src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst_stage: vk::PipelineStageFlags::TRANSFER,
            }),
            (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
                Ok(Self {
                    src_access: vk::AccessFlags::TRANSFER_WRITE,
                    dst_access: vk::AccessFlags::SHADER_READ,
                    src_stage: vk::PipelineStageFlags::TRANSFER,
                    dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
                })
            }
            _ => Err(GpuError::UnsupportedLayoutTransition { old, new }),
        }
    }
}

/// Transition a single-mip color image between layouts and wait for it.
///
/// The layout pair is validated before any command is recorded.
pub fn transition_image_layout(
    device: &DeviceContext,
    pool: &CommandPool,
    queue: vk::Queue,
    image: vk::Image,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<()> {
    let transition = LayoutTransition::between(old, new)?;

    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old)
        .new_layout(new)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .level_count(1)
                .layer_count(1),
        )
        .src_access_mask(transition.src_access)
        .dst_access_mask(transition.dst_access);

    execute_single_time_commands(device, pool, queue, |cmd| {
        // SAFETY: cmd is recording and the image belongs to this device
        unsafe {
            device.device().cmd_pipeline_barrier(
                cmd,
                transition.src_stage,
                transition.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    })
}
