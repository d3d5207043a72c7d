//! `FrameApp` trait definition.

use crate::context::AppContext;
use crate::frame::FrameContext;
use winit::event::WindowEvent;

/// Trait for Lumen applications.
///
/// The framework owns the window, device, swapchain and frame slots, and runs
/// the frame loop. The application owns everything keyed to the swapchain it
/// renders into (render pass, framebuffers, pipelines) and records one command
/// buffer per frame.
pub trait FrameApp: Sized {
    /// Initialize the application.
    ///
    /// Called once after the device and the first swapchain exist. This is the
    /// place to create the render pass and call
    /// [`Swapchain::create_framebuffers`](lumen_gpu::Swapchain::create_framebuffers).
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self>;

    /// Update application state.
    ///
    /// Called every frame before the frame slot is waited on.
    ///
    /// # Arguments
    /// * `ctx` - Application context with device and window access
    /// * `dt` - Delta time in seconds since last frame
    fn update(&mut self, ctx: &AppContext, dt: f32);

    /// Record rendering commands for one frame.
    ///
    /// The command buffer is already in the recording state and will be ended,
    /// submitted and presented by the framework. Commands must leave the image in
    /// `PRESENT_SRC_KHR` layout.
    fn record(&mut self, ctx: &AppContext, frame: &mut FrameContext) -> anyhow::Result<()>;

    /// Rebuild swapchain-dependent objects.
    ///
    /// Called right after every swapchain recreation, with the device idle. The
    /// swapchain has no framebuffers at this point; implementations must create
    /// them again, rebuilding the render pass first if its format changed.
    fn on_swapchain_recreated(&mut self, ctx: &mut AppContext) -> anyhow::Result<()>;

    /// Handle window events.
    ///
    /// Return `true` if the event was handled and should not be processed further.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    /// Cleanup resources before shutdown.
    ///
    /// Called when the application is about to exit. The GPU will be
    /// idle when this is called, so it's safe to destroy GPU resources.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &mut AppContext) {}
}
