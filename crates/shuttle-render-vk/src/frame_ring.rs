// SPDX-License-Identifier: CEPL-1.0
//! One framebuffer and one sync set per swapchain image.

use anyhow::Result;
use ash::prelude::VkResult;
use ash::vk;
use tracing::debug;

use crate::bootstrap::GpuContext;
use crate::error::RenderError;
use crate::render_target::RenderTargetSet;
use crate::swapchain::SwapchainState;

/// Monotonic frame counter. Lives outside the ring so rebuilding the ring
/// never resets it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotCursor {
    frame_count: u64,
    image_count: usize,
}

impl SlotCursor {
    pub fn new(image_count: usize) -> Self {
        Self {
            frame_count: 0,
            image_count: image_count.max(1),
        }
    }

    pub fn current_slot(&self) -> usize {
        (self.frame_count % self.image_count as u64) as usize
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn image_count(&self) -> usize {
        self.image_count
    }

    pub fn advance(&mut self) {
        self.frame_count += 1;
    }

    pub fn set_image_count(&mut self, image_count: usize) {
        self.image_count = image_count.max(1);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireStatus {
    Acquired { index: u32, suboptimal: bool },
    OutOfDate,
    Failed(vk::Result),
}

impl AcquireStatus {
    /// ash folds SUBOPTIMAL into `Ok((index, true))`.
    pub fn from_result(r: VkResult<(u32, bool)>) -> Self {
        match r {
            Ok((index, suboptimal)) => Self::Acquired { index, suboptimal },
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Self::OutOfDate,
            Err(vk::Result::SUBOPTIMAL_KHR) => Self::OutOfDate,
            Err(e) => Self::Failed(e),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentStatus {
    Presented,
    Suboptimal,
    OutOfDate,
    Failed(vk::Result),
}

impl PresentStatus {
    pub fn from_result(r: VkResult<bool>) -> Self {
        match r {
            Ok(false) => Self::Presented,
            Ok(true) | Err(vk::Result::SUBOPTIMAL_KHR) => Self::Suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Self::OutOfDate,
            Err(e) => Self::Failed(e),
        }
    }

    pub fn needs_recreate(&self) -> bool {
        matches!(self, Self::Suboptimal | Self::OutOfDate)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FrameSlot {
    pub cmd: vk::CommandBuffer,
    /// GPU done with this slot's last submit. Created signaled.
    pub fence: vk::Fence,
    /// Image acquired.
    pub present_semaphore: vk::Semaphore,
    /// Rendering complete, present may proceed.
    ///
    /// Known gap: the slot fence covers the submit, not the present that
    /// waits on this semaphore, so reuse relies on the presentation engine
    /// having consumed it by the time the slot comes round again.
    pub render_semaphore: vk::Semaphore,
}

pub struct FrameRing {
    pool: vk::CommandPool,
    slots: Vec<FrameSlot>,
    framebuffers: Vec<vk::Framebuffer>,
}

impl FrameRing {
    /// A failure part way through destroys everything created so far.
    pub unsafe fn create(
        ctx: &GpuContext,
        swap: &SwapchainState,
        targets: &RenderTargetSet,
    ) -> Result<Self> {
        let device = &ctx.device;
        let count = swap.image_count();

        let pool_ci = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            queue_family_index: ctx.selection.families.graphics,
            ..Default::default()
        };
        let pool = device
            .create_command_pool(&pool_ci, None)
            .map_err(RenderError::vk("vkCreateCommandPool"))?;

        let mut ring = Self {
            pool,
            slots: Vec::with_capacity(count),
            framebuffers: Vec::with_capacity(count),
        };
        if let Err(e) = ring.populate(device, swap, targets) {
            ring.destroy(device);
            return Err(e);
        }

        debug!("frame ring: {count} slots / framebuffers");
        Ok(ring)
    }

    // Handles start out null so `destroy` can run on a half-built slot.
    unsafe fn populate(
        &mut self,
        device: &ash::Device,
        swap: &SwapchainState,
        targets: &RenderTargetSet,
    ) -> Result<()> {
        let ai = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: swap.image_count() as u32,
            ..Default::default()
        };
        let cmds = device
            .allocate_command_buffers(&ai)
            .map_err(RenderError::vk("vkAllocateCommandBuffers"))?;

        let sem_ci = vk::SemaphoreCreateInfo::default();
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };

        for cmd in cmds {
            self.slots.push(FrameSlot {
                cmd,
                fence: vk::Fence::null(),
                present_semaphore: vk::Semaphore::null(),
                render_semaphore: vk::Semaphore::null(),
            });
            let i = self.slots.len() - 1;
            self.slots[i].fence = device
                .create_fence(&fence_ci, None)
                .map_err(RenderError::vk("vkCreateFence"))?;
            self.slots[i].present_semaphore = device
                .create_semaphore(&sem_ci, None)
                .map_err(RenderError::vk("vkCreateSemaphore"))?;
            self.slots[i].render_semaphore = device
                .create_semaphore(&sem_ci, None)
                .map_err(RenderError::vk("vkCreateSemaphore"))?;
        }

        for &view in &swap.views {
            let attachments = targets.framebuffer_views(view);
            let fb_ci = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass: targets.render_pass,
                attachment_count: attachments.len() as u32,
                p_attachments: attachments.as_ptr(),
                width: swap.extent.width,
                height: swap.extent.height,
                layers: 1,
                ..Default::default()
            };
            self.framebuffers.push(
                device
                    .create_framebuffer(&fb_ci, None)
                    .map_err(RenderError::vk("vkCreateFramebuffer"))?,
            );
        }
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, i: usize) -> &FrameSlot {
        &self.slots[i]
    }

    pub fn framebuffer(&self, image_index: u32) -> vk::Framebuffer {
        self.framebuffers[image_index as usize]
    }

    /// Signals the slot's present semaphore when the image is ready.
    pub unsafe fn acquire_next_image(
        &self,
        ctx: &GpuContext,
        swapchain: vk::SwapchainKHR,
        slot: usize,
    ) -> AcquireStatus {
        AcquireStatus::from_result(ctx.swapchain_loader.acquire_next_image(
            swapchain,
            u64::MAX,
            self.slots[slot].present_semaphore,
            vk::Fence::null(),
        ))
    }

    /// Caller guarantees the device is idle.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for fb in self.framebuffers.drain(..) {
            device.destroy_framebuffer(fb, None);
        }
        for s in self.slots.drain(..) {
            device.destroy_semaphore(s.present_semaphore, None);
            device.destroy_semaphore(s.render_semaphore, None);
            device.destroy_fence(s.fence, None);
        }
        // Frees the command buffers with it.
        device.destroy_command_pool(self.pool, None);
        self.pool = vk::CommandPool::null();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_wraps_over_image_count() {
        let mut c = SlotCursor::new(3);
        let visited: Vec<usize> = (0..6)
            .map(|_| {
                let s = c.current_slot();
                c.advance();
                s
            })
            .collect();
        assert_eq!(visited, vec![0, 1, 2, 0, 1, 2]);
        assert_eq!(c.frame_count(), 6);
    }

    #[test]
    fn changing_image_count_keeps_counter() {
        let mut c = SlotCursor::new(3);
        for _ in 0..4 {
            c.advance();
        }
        c.set_image_count(2);
        assert_eq!(c.frame_count(), 4);
        assert_eq!(c.current_slot(), 0);
        assert_eq!(c.image_count(), 2);
    }

    #[test]
    fn zero_image_count_is_clamped() {
        let c = SlotCursor::new(0);
        assert_eq!(c.image_count(), 1);
        assert_eq!(c.current_slot(), 0);
    }

    #[test]
    fn acquire_status_mapping() {
        assert_eq!(
            AcquireStatus::from_result(Ok((2, false))),
            AcquireStatus::Acquired {
                index: 2,
                suboptimal: false
            }
        );
        assert_eq!(
            AcquireStatus::from_result(Ok((0, true))),
            AcquireStatus::Acquired {
                index: 0,
                suboptimal: true
            }
        );
        assert_eq!(
            AcquireStatus::from_result(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)),
            AcquireStatus::OutOfDate
        );
        assert_eq!(
            AcquireStatus::from_result(Err(vk::Result::NOT_READY)),
            AcquireStatus::Failed(vk::Result::NOT_READY)
        );
    }

    #[test]
    fn present_status_mapping() {
        assert_eq!(PresentStatus::from_result(Ok(false)), PresentStatus::Presented);
        assert_eq!(PresentStatus::from_result(Ok(true)), PresentStatus::Suboptimal);
        assert_eq!(
            PresentStatus::from_result(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)),
            PresentStatus::OutOfDate
        );
        let lost = PresentStatus::from_result(Err(vk::Result::ERROR_DEVICE_LOST));
        assert_eq!(lost, PresentStatus::Failed(vk::Result::ERROR_DEVICE_LOST));
        assert!(!lost.needs_recreate());
        assert!(PresentStatus::OutOfDate.needs_recreate());
        assert!(PresentStatus::Suboptimal.needs_recreate());
    }
}
