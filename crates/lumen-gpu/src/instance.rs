//! Vulkan instance creation.

use crate::error::{GpuError, Result};
use ash::vk;
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, CStr, CString};

/// Validation layers to enable in debug builds.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![
        // Standard validation layer
        c"VK_LAYER_KHRONOS_validation",
    ]
}

/// Owned Vulkan entry point and instance.
///
/// Dropping destroys the instance, so every surface and device created from it
/// must be dropped first.
pub struct GpuInstance {
    // Entry must outlive the instance
    entry: ash::Entry,
    instance: ash::Instance,
}

impl GpuInstance {
    /// Load Vulkan and create an instance able to present to `display`.
    pub fn new(app_name: &str, enable_validation: bool, display: RawDisplayHandle) -> Result<Self> {
        // SAFETY: loading the system Vulkan library has no preconditions
        let entry =
            unsafe { ash::Entry::load() }.map_err(|e| GpuError::Loading(e.to_string()))?;

        // SAFETY: entry was just loaded
        let instance = unsafe { create_instance(&entry, app_name, enable_validation, display)? };

        Ok(Self { entry, instance })
    }

    /// Get the Vulkan entry point.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }
}

impl Drop for GpuInstance {
    fn drop(&mut self) {
        // SAFETY: surfaces and devices are dropped before the instance by their owners
        unsafe {
            self.instance.destroy_instance(None);
        }
        tracing::debug!("Vulkan instance destroyed");
    }
}

/// Create a Vulkan instance.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    enable_validation: bool,
    display: RawDisplayHandle,
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|_| GpuError::InvalidArgument("application name contains a NUL byte".into()))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"Lumen")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_2);

    // Surface extensions for this display, plus portability on MoltenVK
    let mut extension_names: Vec<*const c_char> =
        ash_window::enumerate_required_extensions(display)?.to_vec();
    #[cfg(target_os = "macos")]
    extension_names.push(ash::khr::portability_enumeration::NAME.as_ptr());

    let layers = if enable_validation {
        unsafe { available_validation_layers(entry)? }
    } else {
        vec![]
    };
    let layer_names: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    let instance = unsafe { entry.create_instance(&create_info, None) }?;

    tracing::info!(
        "Vulkan instance created ({} extensions, validation: {})",
        extension_names.len(),
        !layers.is_empty()
    );

    Ok(instance)
}

/// Filter the requested validation layers down to those the loader provides.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
unsafe fn available_validation_layers(entry: &ash::Entry) -> Result<Vec<&'static CStr>> {
    let available = unsafe { entry.enumerate_instance_layer_properties() }?;

    let mut enabled = Vec::new();
    for layer in validation_layers() {
        let found = available
            .iter()
            .any(|props| props.layer_name_as_c_str().is_ok_and(|name| name == layer));
        if found {
            enabled.push(layer);
        } else {
            tracing::warn!("Validation layer {} not available", layer.to_string_lossy());
        }
    }

    Ok(enabled)
}
