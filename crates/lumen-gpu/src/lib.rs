//! Vulkan presentation layer for Lumen.
//!
//! This crate provides:
//! - Vulkan instance, surface and device bring-up
//! - Swapchain creation, recreation and per-image framebuffers
//! - Frame slots (semaphores and fences) for frames in flight
//! - Command pools, one-shot submissions and image layout transitions

pub mod capabilities;
pub mod command;
pub mod context;
pub mod error;
pub mod instance;
pub mod render_pass;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use capabilities::{DeviceInfo, GpuVendor};
pub use command::{
    begin_command_buffer, end_command_buffer, execute_single_time_commands,
    transition_image_layout, CommandPool, LayoutTransition,
};
pub use context::{find_memory_type, DeviceContext, QueueFamilyIndices};
pub use error::{GpuError, Result};
pub use instance::GpuInstance;
pub use render_pass::RenderPass;
pub use surface::{wait_for_nonzero_size, PresentationSurface, SurfaceCapabilities, WindowExtent};
pub use swapchain::{AcquireOutcome, PresentOutcome, Swapchain};
pub use sync::{create_fence, create_semaphore, FrameSlot, FrameSlots, ImagesInFlight};
