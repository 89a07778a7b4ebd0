// Synchronization primitives
//
// Per frame slot: the acquire semaphore and the fence guarding the slot.
// Per swapchain image: the semaphore present waits on. Presentation of an
// image can still be pending when a frame slot comes around again, so the
// render-finished semaphores follow the image, not the slot.

use anyhow::{Context, Result};
use ash::vk;
use super::VulkanDevice;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &VulkanDevice) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder()
            .flags(vk::FenceCreateFlags::SIGNALED); // First wait returns immediately

        unsafe {
            let image_available = device.device.create_semaphore(&semaphore_info, None)
                .context("Failed to create semaphore")?;

            let in_flight_fence = match device.device.create_fence(&fence_info, None) {
                Ok(fence) => fence,
                Err(e) => {
                    device.device.destroy_semaphore(image_available, None);
                    return Err(e).context("Failed to create fence");
                }
            };

            Ok(Self {
                image_available,
                in_flight_fence,
            })
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// Create `count` binary semaphores
pub fn create_semaphores(device: &VulkanDevice, count: usize) -> Result<Vec<vk::Semaphore>> {
    let semaphore_info = vk::SemaphoreCreateInfo::builder();
    let mut semaphores = Vec::with_capacity(count);

    for _ in 0..count {
        match unsafe { device.device.create_semaphore(&semaphore_info, None) } {
            Ok(semaphore) => semaphores.push(semaphore),
            Err(e) => {
                destroy_semaphores(&device.device, &semaphores);
                return Err(e).context("Failed to create semaphore");
            }
        }
    }

    Ok(semaphores)
}

pub fn destroy_semaphores(device: &ash::Device, semaphores: &[vk::Semaphore]) {
    for &semaphore in semaphores {
        unsafe { device.destroy_semaphore(semaphore, None) };
    }
}

/// Next frame slot, wrapping at `frames_in_flight`
pub fn next_frame(current: usize, frames_in_flight: usize) -> usize {
    (current + 1) % frames_in_flight.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_frame_wraps() {
        assert_eq!(next_frame(0, 2), 1);
        assert_eq!(next_frame(1, 2), 0);
        assert_eq!(next_frame(2, 3), 0);
    }

    #[test]
    fn test_single_frame_in_flight_stays_on_slot_zero() {
        assert_eq!(next_frame(0, 1), 0);
        assert_eq!(next_frame(0, 0), 0);
    }
}
