// SPDX-License-Identifier: CEPL-1.0
//! Per-slot synchronization and command buffers.
//!
//! Slot `i` owns one acquire semaphore, one fence (created signaled so the
//! first wait returns) and one primary command buffer. Slots are reused
//! round-robin; the fence guards all three. Render-complete semaphores are
//! keyed by swapchain image and live with the swapchain resources.

use ash::vk;
use lodge_render::FrameError;

use crate::error::VkResultExt;

pub struct InFlightSlot {
    pub image_acquired: vk::Semaphore,
    pub in_flight: vk::Fence,
    pub cmd: vk::CommandBuffer,
}

impl InFlightSlot {
    fn null() -> Self {
        Self {
            image_acquired: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
            cmd: vk::CommandBuffer::null(),
        }
    }

    unsafe fn create_sync(&mut self, device: &ash::Device) -> Result<(), FrameError> {
        let sem_ci = vk::SemaphoreCreateInfo {
            s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
            ..Default::default()
        };
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        self.image_acquired = device
            .create_semaphore(&sem_ci, None)
            .or_fatal("create_semaphore")?;
        self.in_flight = device
            .create_fence(&fence_ci, None)
            .or_fatal("create_fence")?;
        Ok(())
    }
}

pub struct FrameResourcePool {
    pub command_pool: vk::CommandPool,
    pub slots: Vec<InFlightSlot>,
    /// Which slot last submitted work against each swapchain image.
    image_owner: Vec<Option<usize>>,
}

impl FrameResourcePool {
    /// On failure everything created so far is destroyed before returning.
    pub unsafe fn create(
        device: &ash::Device,
        graphics_family: u32,
        frames_in_flight: usize,
    ) -> Result<Self, FrameError> {
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            queue_family_index: graphics_family,
            ..Default::default()
        };
        let command_pool = device
            .create_command_pool(&pool_info, None)
            .or_fatal("create_command_pool")?;

        let mut pool = Self {
            command_pool,
            slots: Vec::with_capacity(frames_in_flight),
            image_owner: Vec::new(),
        };

        // a half-built slot is still pushed so destroy sees its semaphore
        for _ in 0..frames_in_flight {
            let mut slot = InFlightSlot::null();
            let created = slot.create_sync(device);
            pool.slots.push(slot);
            if let Err(e) = created {
                pool.destroy(device);
                return Err(e);
            }
        }

        // command buffers come with each swapchain generation
        Ok(pool)
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, slot: usize) -> &InFlightSlot {
        &self.slots[slot]
    }

    pub unsafe fn allocate_command_buffers(&mut self, device: &ash::Device) -> Result<(), FrameError> {
        let ai = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.command_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: self.slots.len() as u32,
            ..Default::default()
        };
        let cmds = device
            .allocate_command_buffers(&ai)
            .or_fatal("allocate_command_buffers")?;
        for (slot, cmd) in self.slots.iter_mut().zip(cmds) {
            slot.cmd = cmd;
        }
        Ok(())
    }

    /// Device must be idle.
    pub unsafe fn free_command_buffers(&mut self, device: &ash::Device) {
        let cmds: Vec<_> = self
            .slots
            .iter()
            .map(|s| s.cmd)
            .filter(|c| *c != vk::CommandBuffer::null())
            .collect();
        if !cmds.is_empty() {
            device.free_command_buffers(self.command_pool, &cmds);
        }
        for s in &mut self.slots {
            s.cmd = vk::CommandBuffer::null();
        }
    }

    /// Forget all image owners and size the table for a new swapchain.
    pub fn track_images(&mut self, image_count: usize) {
        self.image_owner.clear();
        self.image_owner.resize(image_count, None);
    }

    /// Records `slot` as the owner of `image` and returns the previous owner
    /// when it is a different slot still to be waited on.
    pub fn claim_image(&mut self, image: usize, slot: usize) -> Option<usize> {
        let entry = self.image_owner.get_mut(image)?;
        let prev = entry.replace(slot);
        prev.filter(|&p| p != slot)
    }

    /// Device must be idle. Leaves the pool empty.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for s in self.slots.drain(..) {
            device.destroy_fence(s.in_flight, None);
            device.destroy_semaphore(s.image_acquired, None);
        }
        self.image_owner.clear();
        // frees the command buffers with it
        device.destroy_command_pool(self.command_pool, None);
        self.command_pool = vk::CommandPool::null();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_without_device(slots: usize) -> FrameResourcePool {
        FrameResourcePool {
            command_pool: vk::CommandPool::null(),
            slots: (0..slots).map(|_| InFlightSlot::null()).collect(),
            image_owner: Vec::new(),
        }
    }

    #[test]
    fn image_claimed_by_other_slot_reports_previous_owner() {
        let mut pool = pool_without_device(2);
        pool.track_images(3);
        assert_eq!(pool.claim_image(0, 0), None);
        assert_eq!(pool.claim_image(1, 1), None);
        assert_eq!(pool.claim_image(0, 1), Some(0));
        // same slot again: its own fence was already waited
        assert_eq!(pool.claim_image(0, 1), None);
    }

    #[test]
    fn fresh_slot_has_nothing_to_destroy() {
        let slot = InFlightSlot::null();
        assert_eq!(slot.image_acquired, vk::Semaphore::null());
        assert_eq!(slot.in_flight, vk::Fence::null());
        assert_eq!(slot.cmd, vk::CommandBuffer::null());
    }

    #[test]
    fn retracking_forgets_owners_and_resizes() {
        let mut pool = pool_without_device(2);
        pool.track_images(2);
        pool.claim_image(1, 0);
        pool.track_images(4);
        assert_eq!(pool.claim_image(1, 1), None);
        assert_eq!(pool.claim_image(3, 0), None);
        assert_eq!(pool.claim_image(4, 0), None);
        assert_eq!(pool.slot_count(), 2);
    }
}
