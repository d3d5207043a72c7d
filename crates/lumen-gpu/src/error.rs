//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// The Vulkan loader could not be found or initialized.
    #[error("Failed to load Vulkan: {0}")]
    Loading(String),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Graphics and present queue families could not both be resolved.
    #[error("Queue families incomplete: graphics and present must both be available")]
    IncompleteQueueFamilies,

    /// Required extension not supported.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// No memory type satisfies the requested filter and properties.
    #[error("No memory type matches filter {type_filter:#b} with properties {properties:?}")]
    NoSuitableMemoryType {
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    },

    /// Layout transition combination that has no barrier mapping.
    #[error("Unsupported layout transition: {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    /// Caller passed an argument outside the accepted range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
