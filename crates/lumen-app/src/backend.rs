//! Vulkan implementation of the frame scheduler's operations.

use anyhow::Result;
use ash::vk;
use lumen_gpu::command::{begin_command_buffer, end_command_buffer};
use lumen_gpu::{AcquireOutcome, PresentOutcome};

use crate::app::FrameApp;
use crate::context::AppContext;
use crate::frame::FrameContext;
use crate::scheduler::FrameBackend;

/// Binds the context and the application for one scheduler call.
pub(crate) struct VulkanBackend<'a, A: FrameApp> {
    pub ctx: &'a mut AppContext,
    pub app: &'a mut A,
    pub dt: f32,
}

impl<A: FrameApp> FrameBackend for VulkanBackend<'_, A> {
    fn frames_in_flight(&self) -> usize {
        self.ctx.frame_slots.len()
    }

    fn image_count(&self) -> usize {
        self.ctx.swapchain.image_count()
    }

    fn wait_slot(&mut self, frame: usize) -> Result<()> {
        self.ctx.frame_slots.wait(frame)?;
        Ok(())
    }

    fn acquire(&mut self, frame: usize) -> Result<AcquireOutcome> {
        let outcome = self
            .ctx
            .swapchain
            .acquire_next_image(&self.ctx.frame_slots, frame)?;
        Ok(outcome)
    }

    fn reset_slot(&mut self, frame: usize) -> Result<()> {
        self.ctx.frame_slots.reset(frame)?;
        Ok(())
    }

    fn record(&mut self, frame: usize, image: u32) -> Result<()> {
        let cmd = self.ctx.command_buffers[frame];
        let device = self.ctx.device.device();

        // SAFETY: the slot's fence was waited on, so the buffer is not pending
        unsafe {
            begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        }

        let swapchain = &self.ctx.swapchain;
        let mut frame_ctx = FrameContext {
            command_buffer: cmd,
            frame_index: frame,
            image_index: image,
            swapchain_image: swapchain.images()[image as usize],
            framebuffer: swapchain
                .framebuffers()
                .get(image as usize)
                .copied()
                .unwrap_or_else(vk::Framebuffer::null),
            extent: swapchain.extent(),
            dt: self.dt,
            frame_number: self.ctx.frame_count,
        };

        self.app.record(&*self.ctx, &mut frame_ctx)?;

        // SAFETY: cmd is in the recording state
        unsafe { end_command_buffer(self.ctx.device.device(), cmd)? };
        Ok(())
    }

    fn submit(&mut self, frame: usize) -> Result<()> {
        let slot = self.ctx.frame_slots.slot(frame)?;

        let command_buffers = [self.ctx.command_buffers[frame]];
        let wait_semaphores = [slot.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [slot.render_finished];

        self.ctx.device.submit(
            &command_buffers,
            &wait_semaphores,
            &wait_stages,
            &signal_semaphores,
            slot.in_flight,
        )?;
        Ok(())
    }

    fn present(&mut self, frame: usize, image: u32) -> Result<PresentOutcome> {
        let outcome = self
            .ctx
            .swapchain
            .present_image(&self.ctx.frame_slots, frame, image)?;
        if outcome != PresentOutcome::OutOfDate {
            self.ctx.frame_count += 1;
        }
        Ok(outcome)
    }

    fn recreate(&mut self) -> Result<()> {
        let ctx = &mut *self.ctx;
        ctx.swapchain
            .recreate(&ctx.device, &ctx.surface, &ctx.window)?;

        tracing::info!(
            "Swapchain recreated: {}x{}",
            ctx.swapchain.extent().width,
            ctx.swapchain.extent().height
        );

        self.app.on_swapchain_recreated(ctx)
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.ctx.device.wait_idle()?;
        Ok(())
    }
}
