//! Device context: logical device, queue roles and submission.

use crate::capabilities::DeviceInfo;
use crate::error::{GpuError, Result};
use crate::instance::GpuInstance;
use crate::surface::PresentationSurface;
use ash::vk;
use std::collections::BTreeSet;
use std::ffi::{c_char, CStr};
use std::sync::Arc;

/// Device extensions every selected GPU must support.
pub fn required_device_extensions() -> Vec<&'static CStr> {
    vec![ash::khr::swapchain::NAME]
}

/// Queue family indices resolved for one physical device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
    /// Dedicated transfer family (transfer-capable, not graphics), if any.
    pub transfer: Option<u32>,
}

impl QueueFamilyIndices {
    /// Resolve queue roles from the device's family list.
    ///
    /// Graphics and present take the first family that qualifies; iteration stops
    /// as soon as both are known. `supports_present` is asked per family index.
    pub fn resolve<F>(families: &[vk::QueueFamilyProperties], mut supports_present: F) -> Result<Self>
    where
        F: FnMut(u32) -> Result<bool>,
    {
        let mut indices = Self::default();

        for (i, family) in families.iter().enumerate() {
            let i = i as u32;

            if indices.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                indices.graphics = Some(i);
            }

            if indices.present.is_none() && supports_present(i)? {
                indices.present = Some(i);
            }

            if indices.is_complete() {
                break;
            }
        }

        indices.transfer = families
            .iter()
            .position(|family| {
                family.queue_flags.contains(vk::QueueFlags::TRANSFER)
                    && !family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            })
            .map(|i| i as u32);

        Ok(indices)
    }

    /// Graphics and present are both resolved.
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Transfer family, aliasing graphics when no dedicated family exists.
    pub fn transfer_or_graphics(&self) -> Option<u32> {
        self.transfer.or(self.graphics)
    }

    /// Graphics and present live in different families.
    pub fn present_is_separate(&self) -> bool {
        self.graphics != self.present
    }
}

/// Find the first memory type allowed by `type_filter` that has all `properties`.
pub fn find_memory_type(
    memory: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32> {
    let count = (memory.memory_type_count as usize).min(memory.memory_types.len());

    memory.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(i, memory_type)| {
            type_filter & (1u32 << *i) != 0 && memory_type.property_flags.contains(properties)
        })
        .map(|(i, _)| i as u32)
        .ok_or(GpuError::NoSuitableMemoryType {
            type_filter,
            properties,
        })
}

/// Logical device with its resolved queue roles.
///
/// Owns the `VkDevice`; everything created from it must be dropped first.
pub struct DeviceContext {
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: Arc<ash::Device>,
    info: DeviceInfo,
    memory_properties: vk::PhysicalDeviceMemoryProperties,

    // Queue families and queues
    graphics_queue_family: u32,
    present_queue_family: u32,
    transfer_queue_family: u32,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    transfer_queue: vk::Queue,
}

impl DeviceContext {
    /// Select a physical device able to present to `surface` and create the logical device.
    pub fn new(instance: &GpuInstance, surface: &PresentationSurface) -> Result<Self> {
        let vk_instance = instance.instance();

        // SAFETY: instance and surface are valid for the duration of the call
        let (physical_device, families) = unsafe { select_physical_device(vk_instance, surface)? };

        // SAFETY: physical device was enumerated from this instance
        let info = unsafe { DeviceInfo::query(vk_instance, physical_device) };
        let memory_properties =
            unsafe { vk_instance.get_physical_device_memory_properties(physical_device) };

        tracing::info!("Selected GPU: {}", info.summary());

        let graphics = families.graphics.ok_or(GpuError::IncompleteQueueFamilies)?;
        let present = families.present.ok_or(GpuError::IncompleteQueueFamilies)?;
        let transfer = families.transfer_or_graphics().unwrap_or(graphics);

        tracing::debug!(
            "Queue families: graphics={graphics} present={present} transfer={transfer}{}",
            if families.transfer.is_none() { " (aliases graphics)" } else { "" }
        );

        // SAFETY: physical device and families were validated above
        let device = unsafe { create_device(vk_instance, physical_device, &[graphics, present, transfer])? };

        // SAFETY: each family was requested with one queue
        let (graphics_queue, present_queue, transfer_queue) = unsafe {
            (
                device.get_device_queue(graphics, 0),
                device.get_device_queue(present, 0),
                device.get_device_queue(transfer, 0),
            )
        };

        Ok(Self {
            instance: vk_instance.clone(),
            physical_device,
            device: Arc::new(device),
            info,
            memory_properties,
            graphics_queue_family: graphics,
            present_queue_family: present,
            transfer_queue_family: transfer,
            graphics_queue,
            present_queue,
            transfer_queue,
        })
    }

    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Shared handle for objects that destroy themselves on drop.
    pub fn shared_device(&self) -> Arc<ash::Device> {
        Arc::clone(&self.device)
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get the Vulkan instance the device was created from.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Identity of the selected GPU.
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Get the graphics queue.
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Get the present queue.
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Get the transfer queue (the graphics queue when no dedicated family exists).
    pub fn transfer_queue(&self) -> vk::Queue {
        self.transfer_queue
    }

    /// Get the graphics queue family index.
    pub fn graphics_queue_family(&self) -> u32 {
        self.graphics_queue_family
    }

    /// Get the present queue family index.
    pub fn present_queue_family(&self) -> u32 {
        self.present_queue_family
    }

    /// Get the transfer queue family index.
    pub fn transfer_queue_family(&self) -> u32 {
        self.transfer_queue_family
    }

    /// Resolve a memory type index for an allocation.
    pub fn find_memory_type(&self, type_filter: u32, properties: vk::MemoryPropertyFlags) -> Result<u32> {
        find_memory_type(&self.memory_properties, type_filter, properties)
    }

    /// Submit command buffers to the graphics queue.
    ///
    /// `wait_stages` pairs 1:1 with `wait_semaphores`. `fence` is signaled once
    /// every buffer has finished executing.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn submit(
        &self,
        command_buffers: &[vk::CommandBuffer],
        wait_semaphores: &[vk::Semaphore],
        wait_stages: &[vk::PipelineStageFlags],
        signal_semaphores: &[vk::Semaphore],
        fence: vk::Fence,
    ) -> Result<()> {
        if wait_semaphores.len() != wait_stages.len() {
            return Err(GpuError::InvalidArgument(format!(
                "{} wait semaphores but {} wait stages",
                wait_semaphores.len(),
                wait_stages.len()
            )));
        }

        let submit_info = vk::SubmitInfo::default()
            .command_buffers(command_buffers)
            .wait_semaphores(wait_semaphores)
            .wait_dst_stage_mask(wait_stages)
            .signal_semaphores(signal_semaphores);

        // SAFETY: handles were created from this device; the caller owns their lifetime
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], fence)?;
        }
        Ok(())
    }

    /// Wait for device to be idle.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
        tracing::debug!("Logical device destroyed");
    }
}

/// Pick the most preferred physical device that can drive `surface`.
///
/// # Safety
/// The instance and surface must be valid.
unsafe fn select_physical_device(
    instance: &ash::Instance,
    surface: &PresentationSurface,
) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
    let devices = unsafe { instance.enumerate_physical_devices() }?;

    if devices.is_empty() {
        return Err(GpuError::NoSuitableDevice);
    }

    let mut best: Option<(u32, vk::PhysicalDevice, QueueFamilyIndices)> = None;

    for device in devices {
        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
        let indices =
            QueueFamilyIndices::resolve(&families, |i| surface.supports_present(device, i))?;
        if !indices.is_complete() || !unsafe { supports_required_extensions(instance, device)? } {
            continue;
        }

        let preference = unsafe { DeviceInfo::query(instance, device) }.preference();
        // First suitable device wins ties
        if best.map_or(true, |(score, _, _)| preference > score) {
            best = Some((preference, device, indices));
        }
    }

    best.map(|(_, device, indices)| (device, indices))
        .ok_or(GpuError::NoSuitableDevice)
}

/// Check that the device exposes every required extension.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn supports_required_extensions(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
) -> Result<bool> {
    let available = unsafe { instance.enumerate_device_extension_properties(device) }?;

    Ok(required_device_extensions().iter().all(|required| {
        available
            .iter()
            .any(|ext| ext.extension_name_as_c_str().is_ok_and(|name| name == *required))
    }))
}

/// Create the logical device with one queue per unique family.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    families: &[u32],
) -> Result<ash::Device> {
    let unique_families: BTreeSet<u32> = families.iter().copied().collect();

    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let extension_names: Vec<*const c_char> = required_device_extensions()
        .iter()
        .map(|ext| ext.as_ptr())
        .collect();

    let features = vk::PhysicalDeviceFeatures::default();

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .enabled_features(&features);

    let device = unsafe { instance.create_device(physical_device, &device_create_info, None) }
        .map_err(GpuError::from)?;

    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn first_graphics_and_present_family_win() {
        let families = [
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let indices = QueueFamilyIndices::resolve(&families, |i| Ok(i >= 1)).unwrap();

        assert_eq!(indices.graphics, Some(1));
        assert_eq!(indices.present, Some(1));
        assert!(!indices.present_is_separate());
    }

    #[test]
    fn resolution_stops_once_complete() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let mut asked = Vec::new();
        let indices = QueueFamilyIndices::resolve(&families, |i| {
            asked.push(i);
            Ok(true)
        })
        .unwrap();

        assert_eq!(asked, vec![0]);
        assert_eq!(indices.graphics, Some(0));
    }

    #[test]
    fn separate_present_family() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::empty())];
        let indices = QueueFamilyIndices::resolve(&families, |i| Ok(i == 1)).unwrap();

        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(1));
        assert!(indices.present_is_separate());
    }

    #[test]
    fn missing_present_is_incomplete() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = QueueFamilyIndices::resolve(&families, |_| Ok(false)).unwrap();

        assert!(!indices.is_complete());
    }

    #[test]
    fn present_query_error_propagates() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let result = QueueFamilyIndices::resolve(&families, |_| {
            Err(GpuError::Vulkan(vk::Result::ERROR_SURFACE_LOST_KHR))
        });

        assert!(matches!(
            result,
            Err(GpuError::Vulkan(vk::Result::ERROR_SURFACE_LOST_KHR))
        ));
    }

    #[test]
    fn dedicated_transfer_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
        ];
        let indices = QueueFamilyIndices::resolve(&families, |_| Ok(true)).unwrap();

        assert_eq!(indices.transfer, Some(1));
        assert_eq!(indices.transfer_or_graphics(), Some(1));
    }

    #[test]
    fn transfer_falls_back_to_graphics() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER)];
        let indices = QueueFamilyIndices::resolve(&families, |_| Ok(true)).unwrap();

        assert_eq!(indices.transfer, None);
        assert_eq!(indices.transfer_or_graphics(), Some(0));
    }

    fn memory_properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut memory = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (slot, &property_flags) in memory.memory_types.iter_mut().zip(flags) {
            slot.property_flags = property_flags;
        }
        memory
    }

    #[test]
    fn memory_type_respects_filter_and_properties() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let memory = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            host,
            host | vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);

        assert_eq!(find_memory_type(&memory, 0b111, host).unwrap(), 1);
        assert_eq!(find_memory_type(&memory, 0b101, host).unwrap(), 2);
        assert_eq!(
            find_memory_type(&memory, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
    }

    #[test]
    fn memory_type_exhaustion_is_an_error() {
        let memory = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let result = find_memory_type(&memory, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE);

        assert!(matches!(
            result,
            Err(GpuError::NoSuitableMemoryType { type_filter: 0b1, .. })
        ));
    }

    #[test]
    fn memory_types_beyond_count_are_ignored() {
        let mut memory = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        memory.memory_types[1].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;

        assert!(find_memory_type(&memory, 0b11, vk::MemoryPropertyFlags::HOST_VISIBLE).is_err());
    }
}
