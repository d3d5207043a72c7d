//! Render pass for presenting a single color attachment.

use crate::context::DeviceContext;
use crate::error::Result;
use ash::vk;
use std::sync::Arc;

/// Attachment description for a swapchain image cleared at load and left ready to present.
pub fn color_present_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
}

/// External dependency ordering the first color write after the acquire semaphore wait.
///
/// The wait stage in the frame submission is COLOR_ATTACHMENT_OUTPUT, so the
/// layout transition at the start of the pass must not run before it.
pub fn acquire_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
}

/// Single-subpass render pass writing one color attachment for presentation.
pub struct RenderPass {
    device: Arc<ash::Device>,
    handle: vk::RenderPass,
    format: vk::Format,
}

impl RenderPass {
    /// Create a clear-and-store pass for images of `format`.
    pub fn new_color_present(device: &DeviceContext, format: vk::Format) -> Result<Self> {
        let attachments = [color_present_attachment(format)];
        let color_refs = [vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)];
        let dependencies = [acquire_dependency()];

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        // SAFETY: create info only borrows locals that outlive the call
        let handle = unsafe { device.device().create_render_pass(&create_info, None) }?;

        Ok(Self {
            device: device.shared_device(),
            handle,
            format,
        })
    }

    pub fn handle(&self) -> vk::RenderPass {
        self.handle
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        // SAFETY: framebuffers using the pass are destroyed with the swapchain or before
        unsafe { self.device.destroy_render_pass(self.handle, None) };
    }
}
