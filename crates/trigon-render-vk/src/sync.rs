// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::vk;
use tracing::debug;

/// Synchronization for one frame in flight.
#[derive(Clone, Copy, Debug)]
pub struct FrameSlot {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

/// K frame slots, created once and never recreated by a swapchain rebuild.
pub struct FrameSlots {
    device: ash::Device,
    slots: Vec<FrameSlot>,
}

impl FrameSlots {
    /// # Safety
    /// Must be dropped on an idle device, before `device` is destroyed.
    pub unsafe fn new(device: &ash::Device, count: usize) -> Result<Self> {
        let sem_ci = vk::SemaphoreCreateInfo::default();
        // Signaled so the first wait on each slot returns at once.
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };

        let mut out = FrameSlots {
            device: device.clone(),
            slots: Vec::with_capacity(count),
        };
        for _ in 0..count {
            let image_available = device
                .create_semaphore(&sem_ci, None)
                .context("create_semaphore(image available)")?;
            let render_finished = match device.create_semaphore(&sem_ci, None) {
                Ok(s) => s,
                Err(e) => {
                    device.destroy_semaphore(image_available, None);
                    return Err(e).context("create_semaphore(render finished)");
                }
            };
            let in_flight = match device.create_fence(&fence_ci, None) {
                Ok(f) => f,
                Err(e) => {
                    device.destroy_semaphore(image_available, None);
                    device.destroy_semaphore(render_finished, None);
                    return Err(e).context("create_fence");
                }
            };
            out.slots.push(FrameSlot {
                image_available,
                render_finished,
                in_flight,
            });
        }
        debug!("{count} frame slots created");
        Ok(out)
    }

    pub fn count(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, slot: usize) -> &FrameSlot {
        &self.slots[slot]
    }
}

impl Drop for FrameSlots {
    fn drop(&mut self) {
        unsafe {
            for s in &self.slots {
                self.device.destroy_fence(s.in_flight, None);
                self.device.destroy_semaphore(s.render_finished, None);
                self.device.destroy_semaphore(s.image_available, None);
            }
        }
    }
}
