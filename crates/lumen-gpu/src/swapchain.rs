//! Swapchain management.
//!
//! The swapchain owns the presentable images, one view per image and, once the
//! caller supplies a render pass, one framebuffer per view. Recreation is
//! wholesale: everything owned is destroyed and rebuilt from fresh surface
//! capabilities. Framebuffers are not rebuilt by recreation since the render
//! pass belongs to the caller.

use crate::context::DeviceContext;
use crate::error::{GpuError, Result};
use crate::surface::{wait_for_nonzero_size, PresentationSurface, WindowExtent};
use crate::sync::FrameSlots;
use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;

/// Result of acquiring the next presentable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Image acquired and the swapchain matches the surface.
    Acquired(u32),
    /// Image acquired but the swapchain no longer matches the surface exactly.
    /// The frame can still be presented; recreate afterwards.
    Suboptimal(u32),
    /// No image was acquired. The frame must be abandoned and the swapchain recreated.
    OutOfDate,
}

impl AcquireOutcome {
    /// Acquired image index, if any.
    pub fn image_index(self) -> Option<u32> {
        match self {
            Self::Acquired(index) | Self::Suboptimal(index) => Some(index),
            Self::OutOfDate => None,
        }
    }
}

/// Result of presenting an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    /// The swapchain should be rebuilt before the next frame.
    pub fn needs_recreate(self) -> bool {
        !matches!(self, Self::Presented)
    }
}

/// Map a raw acquire result onto the staleness outcomes.
pub fn acquire_outcome(result: VkResult<(u32, bool)>) -> Result<AcquireOutcome> {
    match result {
        Ok((index, false)) => Ok(AcquireOutcome::Acquired(index)),
        Ok((index, true)) => Ok(AcquireOutcome::Suboptimal(index)),
        // OUT_OF_DATE means no image was acquired
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(e) => Err(GpuError::from(e)),
    }
}

/// Map a raw present result onto the staleness outcomes.
pub fn present_outcome(result: VkResult<bool>) -> Result<PresentOutcome> {
    match result {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) => Ok(PresentOutcome::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
        Err(e) => Err(GpuError::from(e)),
    }
}

/// Select the surface format: 8-bit BGRA sRGB, else whatever the surface lists first.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    available
        .iter()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_SRGB
                && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| available.first())
        .copied()
        .ok_or_else(|| GpuError::SwapchainCreation("surface reports no formats".to_string()))
}

/// Select the present mode: mailbox when advertised (and vsync not forced), else FIFO.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if !vsync && available.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        // FIFO is always supported
        vk::PresentModeKHR::FIFO
    }
}

/// Calculate swapchain extent.
///
/// A current extent of `u32::MAX` means the surface lets the swapchain decide,
/// so the framebuffer size is clamped into the supported range.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    framebuffer_size: (u32, u32),
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        let (width, height) = framebuffer_size;
        vk::Extent2D {
            width: width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// Requested image count: one above the minimum, capped by a non-zero maximum.
pub fn select_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let image_count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && image_count > capabilities.max_image_count {
        capabilities.max_image_count
    } else {
        image_count
    }
}

/// Sharing mode and the queue families that access the images.
///
/// Distinct graphics and present families share images concurrently so no
/// ownership transfer barriers are needed.
pub fn select_sharing(graphics_family: u32, present_family: u32) -> (vk::SharingMode, Vec<u32>) {
    if graphics_family == present_family {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (
            vk::SharingMode::CONCURRENT,
            vec![graphics_family, present_family],
        )
    }
}

/// Swapchain wrapper.
pub struct Swapchain {
    device: Arc<ash::Device>,
    loader: ash::khr::swapchain::Device,
    present_queue: vk::Queue,
    vsync: bool,

    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Build a swapchain from the current surface capabilities.
    ///
    /// If a step fails part-way, whatever was already created is released.
    pub fn build<W: WindowExtent + ?Sized>(
        device: &DeviceContext,
        surface: &PresentationSurface,
        window: &W,
        vsync: bool,
    ) -> Result<Self> {
        let mut swapchain = Self {
            device: device.shared_device(),
            loader: ash::khr::swapchain::Device::new(device.instance(), device.device()),
            present_queue: device.present_queue(),
            vsync,
            handle: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            framebuffers: Vec::new(),
            surface_format: vk::SurfaceFormatKHR::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            extent: vk::Extent2D::default(),
        };

        swapchain.create(device, surface, window)?;
        Ok(swapchain)
    }

    /// Create the swapchain handle, fetch its images and create their views.
    fn create<W: WindowExtent + ?Sized>(
        &mut self,
        device: &DeviceContext,
        surface: &PresentationSurface,
        window: &W,
    ) -> Result<()> {
        let support = surface.capabilities(device.physical_device())?;
        let capabilities = &support.capabilities;

        let surface_format = select_surface_format(&support.formats)?;
        let present_mode = select_present_mode(&support.present_modes, self.vsync);
        let extent = calculate_extent(capabilities, window.framebuffer_size());
        let image_count = select_image_count(capabilities);

        if extent.width == 0 || extent.height == 0 {
            return Err(GpuError::SwapchainCreation(format!(
                "surface extent is {}x{}",
                extent.width, extent.height
            )));
        }

        let (sharing_mode, queue_families) =
            select_sharing(device.graphics_queue_family(), device.present_queue_family());

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&queue_families)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        // SAFETY: surface and device are valid; no previous swapchain is alive
        self.handle = unsafe { self.loader.create_swapchain(&create_info, None) }
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;
        self.surface_format = surface_format;
        self.present_mode = present_mode;
        self.extent = extent;

        // SAFETY: handle was just created
        self.images = unsafe { self.loader.get_swapchain_images(self.handle) }?;

        self.image_views.reserve(self.images.len());
        for &image in &self.images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .base_mip_level(0)
                        .level_count(1)
                        .base_array_layer(0)
                        .layer_count(1),
                );

            // SAFETY: image belongs to this swapchain
            let view = unsafe { self.device.create_image_view(&view_info, None) }?;
            self.image_views.push(view);
        }

        tracing::info!(
            "Swapchain built: {}x{}, {} images, {:?}/{:?}, {:?}",
            extent.width,
            extent.height,
            self.images.len(),
            surface_format.format,
            surface_format.color_space,
            present_mode
        );

        Ok(())
    }

    /// Create one framebuffer per image view for `render_pass`.
    ///
    /// Replaces any framebuffers from an earlier call. Must be called again after
    /// every [`Swapchain::recreate`].
    pub fn create_framebuffers(&mut self, render_pass: vk::RenderPass) -> Result<()> {
        self.destroy_framebuffers();

        self.framebuffers.reserve(self.image_views.len());
        for &view in &self.image_views {
            let attachments = [view];
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);

            // SAFETY: view and render pass were created from this device
            let framebuffer = unsafe { self.device.create_framebuffer(&framebuffer_info, None) }?;
            self.framebuffers.push(framebuffer);
        }

        tracing::debug!("Created {} framebuffers", self.framebuffers.len());
        Ok(())
    }

    /// Rebuild the swapchain for the current surface state.
    ///
    /// Blocks while the window is minimized, waits for the device to go idle,
    /// destroys framebuffers, views and the swapchain, then builds again.
    /// Framebuffers are left empty for the caller to recreate.
    pub fn recreate<W: WindowExtent + ?Sized>(
        &mut self,
        device: &DeviceContext,
        surface: &PresentationSurface,
        window: &W,
    ) -> Result<()> {
        wait_for_nonzero_size(window);
        device.wait_idle()?;

        self.cleanup();
        self.create(device, surface, window)
    }

    /// Acquire the next image, signaling the frame slot's image-available semaphore.
    ///
    /// Waits without timeout.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn acquire_next_image(&self, slots: &FrameSlots, frame_index: usize) -> Result<AcquireOutcome> {
        let semaphore = slots.image_available(frame_index)?;

        // SAFETY: swapchain and semaphore are alive; the semaphore is unsignaled
        // because its previous signal was consumed by this slot's last submission
        let result = unsafe {
            self.loader
                .acquire_next_image(self.handle, u64::MAX, semaphore, vk::Fence::null())
        };

        let outcome = acquire_outcome(result)?;
        if let Some(index) = outcome.image_index() {
            if index as usize >= self.images.len() {
                return Err(GpuError::InvalidArgument(format!(
                    "acquired image {index} but the swapchain has {} images",
                    self.images.len()
                )));
            }
        }
        Ok(outcome)
    }

    /// Present `image_index` once the frame slot's render-finished semaphore is signaled.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn present_image(
        &self,
        slots: &FrameSlots,
        frame_index: usize,
        image_index: u32,
    ) -> Result<PresentOutcome> {
        if image_index as usize >= self.images.len() {
            return Err(GpuError::InvalidArgument(format!(
                "image index {image_index} out of range for {} images",
                self.images.len()
            )));
        }

        let wait_semaphores = [slots.render_finished(frame_index)?];
        let swapchains = [self.handle];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        // SAFETY: queue, swapchain and semaphore are alive
        let result = unsafe { self.loader.queue_present(self.present_queue, &present_info) };

        present_outcome(result)
    }

    fn destroy_framebuffers(&mut self) {
        for framebuffer in self.framebuffers.drain(..) {
            // SAFETY: device is idle with respect to this framebuffer
            unsafe { self.device.destroy_framebuffer(framebuffer, None) };
        }
    }

    /// Destroy framebuffers, views and the swapchain. Safe on a partial build.
    fn cleanup(&mut self) {
        self.destroy_framebuffers();

        for view in self.image_views.drain(..) {
            // SAFETY: framebuffers referencing the view are already gone
            unsafe { self.device.destroy_image_view(view, None) };
        }
        self.images.clear();

        if self.handle != vk::SwapchainKHR::null() {
            // SAFETY: no view references swapchain images anymore
            unsafe { self.loader.destroy_swapchain(self.handle, None) };
            self.handle = vk::SwapchainKHR::null();
        }
    }

    /// Get the raw swapchain handle.
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    /// Get the color format of the images.
    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    /// Get the full surface format (format + color space).
    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    /// Get the selected present mode.
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Get the image extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Number of images in the current chain.
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Get the swapchain images.
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// Get the image views, in image order.
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Get the framebuffers, in image order. Empty until [`Swapchain::create_framebuffers`].
    pub fn framebuffers(&self) -> &[vk::Framebuffer] {
        &self.framebuffers
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min_image_count: u32, max_image_count: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count,
            max_image_count,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 64,
                height: 64,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            ..Default::default()
        }
    }

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn image_count_unbounded_maximum() {
        assert_eq!(select_image_count(&caps(2, 0)), 3);
    }

    #[test]
    fn image_count_clamped_to_maximum() {
        assert_eq!(select_image_count(&caps(2, 2)), 2);
        assert_eq!(select_image_count(&caps(2, 8)), 3);
    }

    #[test]
    fn surface_format_prefers_bgra_srgb() {
        let available = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(select_surface_format(&available).unwrap(), available[1]);
    }

    #[test]
    fn surface_format_falls_back_to_first() {
        let available = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            // Right format, wrong color space
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        assert_eq!(select_surface_format(&available).unwrap(), available[0]);
    }

    #[test]
    fn surface_format_requires_at_least_one() {
        assert!(matches!(
            select_surface_format(&[]),
            Err(GpuError::SwapchainCreation(_))
        ));
    }

    #[test]
    fn present_mode_prefers_mailbox() {
        let available = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(select_present_mode(&available, false), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn present_mode_never_picks_other_modes() {
        let available = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO_RELAXED];
        assert_eq!(select_present_mode(&available, false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn vsync_forces_fifo() {
        let available = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
        assert_eq!(select_present_mode(&available, true), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn extent_uses_reported_current_extent() {
        let mut capabilities = caps(2, 0);
        capabilities.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        assert_eq!(
            calculate_extent(&capabilities, (1920, 1080)),
            vk::Extent2D {
                width: 800,
                height: 600
            }
        );
    }

    #[test]
    fn extent_clamps_each_axis_independently() {
        let capabilities = caps(2, 0);
        assert_eq!(
            calculate_extent(&capabilities, (8000, 10)),
            vk::Extent2D {
                width: 4096,
                height: 64
            }
        );
        assert_eq!(
            calculate_extent(&capabilities, (1280, 720)),
            vk::Extent2D {
                width: 1280,
                height: 720
            }
        );
    }

    #[test]
    fn extent_is_stable_for_unchanged_window() {
        let capabilities = caps(2, 0);
        let first = calculate_extent(&capabilities, (1024, 768));
        let second = calculate_extent(&capabilities, (1024, 768));
        assert_eq!(first, second);
    }

    #[test]
    fn sharing_mode_follows_queue_families() {
        assert_eq!(select_sharing(0, 0), (vk::SharingMode::EXCLUSIVE, vec![]));
        assert_eq!(
            select_sharing(0, 2),
            (vk::SharingMode::CONCURRENT, vec![0, 2])
        );
    }

    #[test]
    fn acquire_results_map_to_outcomes() {
        assert_eq!(acquire_outcome(Ok((1, false))).unwrap(), AcquireOutcome::Acquired(1));
        assert_eq!(acquire_outcome(Ok((2, true))).unwrap(), AcquireOutcome::Suboptimal(2));
        assert_eq!(
            acquire_outcome(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            AcquireOutcome::OutOfDate
        );
        assert!(matches!(
            acquire_outcome(Err(vk::Result::ERROR_DEVICE_LOST)),
            Err(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST))
        ));
        assert_eq!(AcquireOutcome::OutOfDate.image_index(), None);
        assert_eq!(AcquireOutcome::Suboptimal(2).image_index(), Some(2));
    }

    #[test]
    fn present_results_map_to_outcomes() {
        assert_eq!(present_outcome(Ok(false)).unwrap(), PresentOutcome::Presented);
        assert_eq!(present_outcome(Ok(true)).unwrap(), PresentOutcome::Suboptimal);
        assert_eq!(
            present_outcome(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            PresentOutcome::OutOfDate
        );
        assert!(present_outcome(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).is_err());
        assert!(!PresentOutcome::Presented.needs_recreate());
        assert!(PresentOutcome::Suboptimal.needs_recreate());
        assert!(PresentOutcome::OutOfDate.needs_recreate());
    }
}
