//! Presentation surface management for windowed rendering.
//!
//! Provides the Vulkan surface tied to a window and the capability queries the
//! swapchain is built from, hiding the raw-window-handle complexity from
//! application code.

use crate::error::{GpuError, Result};
use crate::instance::GpuInstance;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

/// Window-side view needed by swapchain construction and recreation.
pub trait WindowExtent {
    /// Current framebuffer size in physical pixels. Zero on either axis means minimized.
    fn framebuffer_size(&self) -> (u32, u32);

    /// Block until window-system events had a chance to change the framebuffer size.
    fn wait_events(&self);
}

/// Block while the window reports a zero-sized framebuffer.
///
/// Returns the first non-zero size observed. There is no timeout.
pub fn wait_for_nonzero_size<W: WindowExtent + ?Sized>(window: &W) -> (u32, u32) {
    let (mut width, mut height) = window.framebuffer_size();
    if width == 0 || height == 0 {
        tracing::debug!("Framebuffer is zero-sized, waiting for the window to be restored");
    }
    while width == 0 || height == 0 {
        window.wait_events();
        (width, height) = window.framebuffer_size();
    }
    (width, height)
}

/// Presentation surface for a window.
pub struct PresentationSurface {
    /// The Vulkan surface handle.
    surface: vk::SurfaceKHR,
    /// Surface extension loader.
    loader: ash::khr::surface::Instance,
}

impl PresentationSurface {
    /// Create a surface for a window.
    pub fn from_window<W>(instance: &GpuInstance, window: &W) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle + ?Sized,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;

        // SAFETY: the handles come from a live window and the instance was created
        // with the extensions this display requires
        let surface = unsafe {
            ash_window::create_surface(
                instance.entry(),
                instance.instance(),
                display.as_raw(),
                window_handle.as_raw(),
                None,
            )
        }
        .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?;

        let loader = ash::khr::surface::Instance::new(instance.entry(), instance.instance());

        Ok(Self { surface, loader })
    }

    /// Get the raw surface handle.
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Whether queue family `family` of `physical_device` can present to this surface.
    pub fn supports_present(&self, physical_device: vk::PhysicalDevice, family: u32) -> Result<bool> {
        // SAFETY: surface and physical device belong to the same instance
        let supported = unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, family, self.surface)
        }?;
        Ok(supported)
    }

    /// Query surface capabilities, formats and present modes.
    pub fn capabilities(&self, physical_device: vk::PhysicalDevice) -> Result<SurfaceCapabilities> {
        // SAFETY: surface and physical device belong to the same instance
        unsafe {
            let caps = self
                .loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)?;

            let formats = self
                .loader
                .get_physical_device_surface_formats(physical_device, self.surface)?;

            let present_modes = self
                .loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)?;

            Ok(SurfaceCapabilities {
                capabilities: caps,
                formats,
                present_modes,
            })
        }
    }
}

impl Drop for PresentationSurface {
    fn drop(&mut self) {
        // SAFETY: the swapchain built on this surface is dropped before it
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }
}

/// Surface capabilities query result.
#[derive(Debug, Clone, Default)]
pub struct SurfaceCapabilities {
    /// Raw surface capabilities.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}
