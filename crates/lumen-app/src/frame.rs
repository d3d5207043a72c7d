//! Per-frame context for rendering.

use ash::vk;

/// Context for the frame being recorded.
///
/// `frame_index` selects the frame slot and `image_index` the swapchain image;
/// the two are unrelated and advance independently.
pub struct FrameContext {
    /// Command buffer for recording rendering commands.
    pub command_buffer: vk::CommandBuffer,
    /// Frame slot in `[0, max_frames_in_flight)`.
    pub frame_index: usize,
    /// Index of the acquired swapchain image.
    pub image_index: u32,
    /// The swapchain image for this frame.
    pub swapchain_image: vk::Image,
    /// Framebuffer for the image, or null if none were created.
    pub framebuffer: vk::Framebuffer,
    /// Current swapchain extent.
    pub extent: vk::Extent2D,
    /// Delta time since last frame in seconds.
    pub dt: f32,
    /// Current frame number.
    pub frame_number: u64,
}
