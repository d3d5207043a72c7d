//! Application context.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use ash::vk;
use lumen_gpu::{
    CommandPool, DeviceContext, FrameSlots, GpuInstance, PresentationSurface, Swapchain,
    WindowExtent,
};
use winit::raw_window_handle::HasDisplayHandle;
use winit::window::Window;

use crate::config::AppConfig;

/// Window as seen by swapchain construction.
///
/// While minimized, polling sleeps for the configured interval between size
/// queries instead of pumping the event loop.
#[derive(Clone)]
pub struct AppWindow {
    window: Arc<Window>,
    poll_interval: Duration,
}

impl AppWindow {
    pub fn new(window: Arc<Window>, poll_interval: Duration) -> Self {
        Self {
            window,
            poll_interval,
        }
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    /// Whether the framebuffer currently has zero area.
    pub fn is_minimized(&self) -> bool {
        let (width, height) = self.framebuffer_size();
        width == 0 || height == 0
    }
}

impl WindowExtent for AppWindow {
    fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    fn wait_events(&self) {
        thread::sleep(self.poll_interval);
    }
}

/// Application context shared across all app methods.
///
/// Fields drop in declaration order: frame slots and the command pool first,
/// then the swapchain, the device, the surface and finally the instance.
pub struct AppContext {
    /// Per-frame-slot synchronization.
    pub(crate) frame_slots: FrameSlots,
    /// One primary command buffer per frame slot.
    pub(crate) command_buffers: Vec<vk::CommandBuffer>,
    /// Command pool on the graphics family.
    pub command_pool: CommandPool,
    /// Current swapchain.
    pub swapchain: Swapchain,
    /// Logical device and queues.
    pub device: DeviceContext,
    /// Presentation surface for the window.
    pub surface: PresentationSurface,
    /// Vulkan instance.
    pub instance: GpuInstance,
    /// The window handle.
    pub window: AppWindow,
    /// Total frames presented.
    pub frame_count: u64,
    /// Time of last frame (for delta time calculation).
    pub(crate) last_frame_time: Instant,
}

impl AppContext {
    /// Bring up Vulkan for `window`: instance, surface, device, swapchain and frame slots.
    pub(crate) fn new(window: Arc<Window>, config: &AppConfig) -> anyhow::Result<Self> {
        let display = window
            .display_handle()
            .map_err(|e| anyhow!("Failed to get display handle: {e}"))?
            .as_raw();

        let instance = GpuInstance::new(&config.title, config.validation, display)?;
        let surface = PresentationSurface::from_window(&instance, window.as_ref())?;
        let device = DeviceContext::new(&instance, &surface)?;

        tracing::info!("GPU: {}", device.info().summary());

        let window = AppWindow::new(window, config.minimized_poll_interval);
        let swapchain = Swapchain::build(&device, &surface, &window, config.vsync)?;

        let command_pool = CommandPool::new(&device, device.graphics_queue_family())?;
        let frame_slots = FrameSlots::build(&device, config.max_frames_in_flight)?;
        let command_buffers = command_pool.allocate_command_buffers(frame_slots.len() as u32)?;

        tracing::info!(
            "{} frames in flight over {} swapchain images",
            frame_slots.len(),
            swapchain.image_count()
        );

        Ok(Self {
            frame_slots,
            command_buffers,
            command_pool,
            swapchain,
            device,
            surface,
            instance,
            window,
            frame_count: 0,
            last_frame_time: Instant::now(),
        })
    }

    /// Get the current swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Get the swapchain width.
    pub fn width(&self) -> u32 {
        self.swapchain.extent().width
    }

    /// Get the swapchain height.
    pub fn height(&self) -> u32 {
        self.swapchain.extent().height
    }

    /// Get the aspect ratio (width / height).
    pub fn aspect_ratio(&self) -> f32 {
        self.width() as f32 / self.height() as f32
    }

    /// Get the number of frames in flight.
    pub fn frames_in_flight(&self) -> usize {
        self.frame_slots.len()
    }

    /// Frame slots, for recording code that needs a slot's handles.
    pub fn frame_slots(&self) -> &FrameSlots {
        &self.frame_slots
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            tracing::error!("Failed to wait idle: {e}");
        }
        tracing::info!("Releasing GPU resources");
    }
}
