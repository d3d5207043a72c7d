//! Synchronization primitives.
//!
//! A fixed ring of frame slots, each holding the semaphores and fence one frame
//! in flight needs, plus the table recording which slot last rendered into each
//! swapchain image.

use crate::context::DeviceContext;
use crate::error::{GpuError, Result};
use ash::vk;
use std::sync::Arc;

/// Fence flags for a new slot. Pre-signaled so the first wait on a slot returns
/// immediately.
pub const IN_FLIGHT_FENCE_FLAGS: vk::FenceCreateFlags = vk::FenceCreateFlags::SIGNALED;

/// Create a semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    let semaphore = unsafe { device.create_semaphore(&create_info, None) }?;
    Ok(semaphore)
}

/// Create a fence.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, flags: vk::FenceCreateFlags) -> Result<vk::Fence> {
    let create_info = vk::FenceCreateInfo::default().flags(flags);
    let fence = unsafe { device.create_fence(&create_info, None) }?;
    Ok(fence)
}

/// Synchronization resources for one frame in flight.
#[derive(Debug, Clone, Copy)]
pub struct FrameSlot {
    /// Semaphore signaled when image is available
    pub image_available: vk::Semaphore,
    /// Semaphore signaled when rendering is complete
    pub render_finished: vk::Semaphore,
    /// Fence signaled when the slot's submission has retired
    pub in_flight: vk::Fence,
}

impl FrameSlot {
    /// # Safety
    /// The device must be valid and the slot must not be in use.
    unsafe fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight, None);
        }
    }
}

/// Ring of frame slots indexed by frame index in `[0, len)`.
///
/// Dropping waits for the device to go idle before freeing anything.
pub struct FrameSlots {
    device: Arc<ash::Device>,
    slots: Vec<FrameSlot>,
}

impl FrameSlots {
    /// Create `max_frames_in_flight` slots.
    pub fn build(device: &DeviceContext, max_frames_in_flight: usize) -> Result<Self> {
        if max_frames_in_flight == 0 {
            return Err(GpuError::InvalidArgument(
                "max_frames_in_flight must be at least 1".to_string(),
            ));
        }

        let mut frame_slots = Self {
            device: device.shared_device(),
            slots: Vec::with_capacity(max_frames_in_flight),
        };

        for _ in 0..max_frames_in_flight {
            // Created one handle at a time so a failure leaves nothing unowned
            let image_available = unsafe { create_semaphore(&frame_slots.device)? };
            let render_finished = match unsafe { create_semaphore(&frame_slots.device) } {
                Ok(semaphore) => semaphore,
                Err(e) => {
                    unsafe { frame_slots.device.destroy_semaphore(image_available, None) };
                    return Err(e);
                }
            };
            let in_flight = match unsafe { create_fence(&frame_slots.device, IN_FLIGHT_FENCE_FLAGS) } {
                Ok(fence) => fence,
                Err(e) => {
                    unsafe {
                        frame_slots.device.destroy_semaphore(image_available, None);
                        frame_slots.device.destroy_semaphore(render_finished, None);
                    }
                    return Err(e);
                }
            };

            frame_slots.slots.push(FrameSlot {
                image_available,
                render_finished,
                in_flight,
            });
        }

        tracing::debug!("Created {max_frames_in_flight} frame slots");
        Ok(frame_slots)
    }

    /// Number of slots (the maximum number of frames in flight).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always false; a ring has at least one slot.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Get the slot for `frame_index`.
    pub fn slot(&self, frame_index: usize) -> Result<&FrameSlot> {
        self.slots.get(frame_index).ok_or_else(|| {
            GpuError::InvalidArgument(format!(
                "frame index {frame_index} out of range for {} slots",
                self.slots.len()
            ))
        })
    }

    pub fn image_available(&self, frame_index: usize) -> Result<vk::Semaphore> {
        Ok(self.slot(frame_index)?.image_available)
    }

    pub fn render_finished(&self, frame_index: usize) -> Result<vk::Semaphore> {
        Ok(self.slot(frame_index)?.render_finished)
    }

    pub fn in_flight(&self, frame_index: usize) -> Result<vk::Fence> {
        Ok(self.slot(frame_index)?.in_flight)
    }

    /// Block until the slot's last submission has retired. No timeout.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn wait(&self, frame_index: usize) -> Result<()> {
        let fence = self.in_flight(frame_index)?;
        // SAFETY: fence belongs to this device
        unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX) }?;
        Ok(())
    }

    /// Return the slot's fence to unsignaled. Only after [`FrameSlots::wait`] succeeded
    /// and right before the slot is submitted again.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn reset(&self, frame_index: usize) -> Result<()> {
        let fence = self.in_flight(frame_index)?;
        // SAFETY: the fence is signaled and not referenced by a pending submission
        unsafe { self.device.reset_fences(&[fence]) }?;
        Ok(())
    }
}

impl Drop for FrameSlots {
    fn drop(&mut self) {
        // SAFETY: after an idle wait nothing in flight references the slots
        unsafe {
            let _ = self.device.device_wait_idle();
            for slot in &self.slots {
                slot.destroy(&self.device);
            }
        }
        self.slots.clear();
    }
}

/// Which frame slot last submitted work targeting each swapchain image.
///
/// With fewer slots than images, two slots can acquire the same image while the
/// first submission is still executing. Before rendering into an image, the
/// owning slot's fence has to be waited on as well.
#[derive(Debug, Clone, Default)]
pub struct ImagesInFlight {
    owners: Vec<Option<usize>>,
}

impl ImagesInFlight {
    /// Empty table for `image_count` images.
    pub fn new(image_count: usize) -> Self {
        Self {
            owners: vec![None; image_count],
        }
    }

    /// Forget all owners and resize to a rebuilt swapchain.
    pub fn reset(&mut self, image_count: usize) {
        self.owners.clear();
        self.owners.resize(image_count, None);
    }

    pub fn image_count(&self) -> usize {
        self.owners.len()
    }

    /// Slot that last targeted `image_index`, if any.
    pub fn owner(&self, image_index: usize) -> Option<usize> {
        self.owners.get(image_index).copied().flatten()
    }

    /// Record `frame_index` as the new owner of `image_index`.
    ///
    /// Returns the previous owner when it is a different slot, i.e. the slot
    /// whose fence must be waited on before the image is rendered again.
    pub fn claim(&mut self, image_index: usize, frame_index: usize) -> Result<Option<usize>> {
        let count = self.owners.len();
        let owner = self.owners.get_mut(image_index).ok_or_else(|| {
            GpuError::InvalidArgument(format!(
                "image index {image_index} out of range for {count} images"
            ))
        })?;

        let previous = owner.replace(frame_index);
        Ok(previous.filter(|&slot| slot != frame_index))
    }
}
