// SPDX-License-Identifier: CEPL-1.0
//! Swapchain-scoped resources and the recreate sequence.
//!
//! STRICT ORDER (recreate):
//! 1) Wait for device idle: nothing may still reference the old chain
//! 2) Query the surface; a 0x0 extent defers without touching anything
//! 3) Destroy frame ring → pipeline → render targets → swapchain
//! 4) Create swapchain → render targets → pipeline → frame ring
//! 5) Reallocate descriptor sets only if the image count changed
//! Any deviation can cause DEVICE_LOST or image-in-use errors.
//!
//! The GPU work sits behind `ChainParts` so the sequence runs without a device.

use anyhow::{Context, Result};
use shuttle_render::RenderSize;
use tracing::{debug, info};

use crate::frame_driver::RecreateStatus;

/// Creates and destroys the four swapchain-scoped pieces. Only
/// `SwapchainBundle` and `recreate_bundle` decide the order they run in.
pub trait ChainParts {
    type Swapchain;
    type Targets;
    type Pipeline;
    type Ring;

    fn wait_idle(&mut self);
    /// Current surface extent as (width, height).
    fn surface_extent(&self) -> Result<(u32, u32)>;
    fn image_count(swap: &Self::Swapchain) -> usize;

    fn create_swapchain(&mut self, size: RenderSize) -> Result<Self::Swapchain>;
    fn create_targets(&mut self, swap: &Self::Swapchain) -> Result<Self::Targets>;
    fn create_pipeline(&mut self, targets: &Self::Targets) -> Result<Self::Pipeline>;
    fn create_ring(&mut self, swap: &Self::Swapchain, targets: &Self::Targets)
        -> Result<Self::Ring>;

    fn destroy_ring(&mut self, ring: Self::Ring);
    fn destroy_pipeline(&mut self, pipeline: Self::Pipeline);
    fn destroy_targets(&mut self, targets: Self::Targets);
    fn destroy_swapchain(&mut self, swap: Self::Swapchain);

    fn descriptor_set_count(&self) -> usize;
    fn rebuild_descriptor_sets(&mut self, count: usize) -> Result<()>;
}

/// Everything whose lifetime is tied to one swapchain.
pub struct SwapchainBundle<P: ChainParts> {
    pub swap: P::Swapchain,
    pub targets: P::Targets,
    pub pipeline: P::Pipeline,
    pub ring: P::Ring,
}

impl<P: ChainParts> SwapchainBundle<P> {
    /// Swapchain → render targets → pipeline → frame ring. A failed step
    /// destroys whatever was already built before returning the error.
    pub fn create(parts: &mut P, size: RenderSize) -> Result<Self> {
        let swap = parts.create_swapchain(size).context("swapchain")?;

        let targets = match parts.create_targets(&swap) {
            Ok(t) => t,
            Err(e) => {
                parts.destroy_swapchain(swap);
                return Err(e.context("render targets"));
            }
        };

        let pipeline = match parts.create_pipeline(&targets) {
            Ok(p) => p,
            Err(e) => {
                parts.destroy_targets(targets);
                parts.destroy_swapchain(swap);
                return Err(e.context("graphics pipeline"));
            }
        };

        let ring = match parts.create_ring(&swap, &targets) {
            Ok(r) => r,
            Err(e) => {
                parts.destroy_pipeline(pipeline);
                parts.destroy_targets(targets);
                parts.destroy_swapchain(swap);
                return Err(e.context("frame ring"));
            }
        };

        Ok(Self {
            swap,
            targets,
            pipeline,
            ring,
        })
    }

    pub fn image_count(&self) -> usize {
        P::image_count(&self.swap)
    }

    /// Frame ring → pipeline → render targets → swapchain. Caller has
    /// waited for device idle.
    pub fn destroy(self, parts: &mut P) {
        parts.destroy_ring(self.ring);
        parts.destroy_pipeline(self.pipeline);
        parts.destroy_targets(self.targets);
        parts.destroy_swapchain(self.swap);
    }
}

/// Builds a bundle into `slot` and resizes the descriptor sets if the image
/// count differs from `old_count`. The bundle lands in `slot` before the
/// sets are touched, so the owner still destroys it if that step fails.
pub fn install_bundle<P: ChainParts>(
    parts: &mut P,
    slot: &mut Option<SwapchainBundle<P>>,
    size: RenderSize,
    old_count: usize,
) -> Result<usize> {
    let bundle = SwapchainBundle::create(parts, size)?;
    let image_count = bundle.image_count();
    *slot = Some(bundle);
    if image_count != old_count {
        debug!("descriptor sets: {old_count} → {image_count}");
        parts
            .rebuild_descriptor_sets(image_count)
            .context("descriptor sets")?;
    }
    Ok(image_count)
}

pub fn recreate_bundle<P: ChainParts>(
    parts: &mut P,
    slot: &mut Option<SwapchainBundle<P>>,
    size: RenderSize,
) -> Result<RecreateStatus> {
    parts.wait_idle();

    let (width, height) = parts.surface_extent()?;
    if width == 0 || height == 0 {
        info!("surface extent is 0x0, deferring recreate");
        return Ok(RecreateStatus::Deferred);
    }

    let old_count = parts.descriptor_set_count();
    if let Some(old) = slot.take() {
        old.destroy(parts);
    }
    let image_count = install_bundle(parts, slot, size, old_count)?;
    Ok(RecreateStatus::Rebuilt { image_count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::collections::VecDeque;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Step {
        WaitIdle,
        CreateSwapchain,
        CreateTargets,
        CreatePipeline,
        CreateRing,
        DestroyRing,
        DestroyPipeline,
        DestroyTargets,
        DestroySwapchain,
        RebuildSets(usize),
    }

    struct Swap {
        images: usize,
    }

    struct Ring {
        slots: usize,
        framebuffers: usize,
    }

    struct MockParts {
        extent: (u32, u32),
        /// Image count handed out by each successive swapchain build.
        image_counts: VecDeque<usize>,
        fail_pipeline: bool,
        sets: usize,
        live: usize,
        steps: Vec<Step>,
    }

    impl MockParts {
        fn new(image_counts: &[usize]) -> Self {
            Self {
                extent: (800, 600),
                image_counts: image_counts.iter().copied().collect(),
                fail_pipeline: false,
                sets: 0,
                live: 0,
                steps: Vec::new(),
            }
        }

        fn created(&mut self, step: Step) {
            self.live += 1;
            self.steps.push(step);
        }

        fn destroyed(&mut self, step: Step) {
            self.live -= 1;
            self.steps.push(step);
        }
    }

    impl ChainParts for MockParts {
        type Swapchain = Swap;
        type Targets = ();
        type Pipeline = ();
        type Ring = Ring;

        fn wait_idle(&mut self) {
            self.steps.push(Step::WaitIdle);
        }

        fn surface_extent(&self) -> Result<(u32, u32)> {
            Ok(self.extent)
        }

        fn image_count(swap: &Swap) -> usize {
            swap.images
        }

        fn create_swapchain(&mut self, _size: RenderSize) -> Result<Swap> {
            self.created(Step::CreateSwapchain);
            Ok(Swap {
                images: self.image_counts.pop_front().unwrap_or(3),
            })
        }

        fn create_targets(&mut self, _swap: &Swap) -> Result<()> {
            self.created(Step::CreateTargets);
            Ok(())
        }

        fn create_pipeline(&mut self, _targets: &()) -> Result<()> {
            if self.fail_pipeline {
                self.steps.push(Step::CreatePipeline);
                bail!("vkCreateGraphicsPipelines: ERROR_OUT_OF_DEVICE_MEMORY");
            }
            self.created(Step::CreatePipeline);
            Ok(())
        }

        fn create_ring(&mut self, swap: &Swap, _targets: &()) -> Result<Ring> {
            self.created(Step::CreateRing);
            Ok(Ring {
                slots: swap.images,
                framebuffers: swap.images,
            })
        }

        fn destroy_ring(&mut self, _ring: Ring) {
            self.destroyed(Step::DestroyRing);
        }

        fn destroy_pipeline(&mut self, _pipeline: ()) {
            self.destroyed(Step::DestroyPipeline);
        }

        fn destroy_targets(&mut self, _targets: ()) {
            self.destroyed(Step::DestroyTargets);
        }

        fn destroy_swapchain(&mut self, _swap: Swap) {
            self.destroyed(Step::DestroySwapchain);
        }

        fn descriptor_set_count(&self) -> usize {
            self.sets
        }

        fn rebuild_descriptor_sets(&mut self, count: usize) -> Result<()> {
            self.steps.push(Step::RebuildSets(count));
            self.sets = count;
            Ok(())
        }
    }

    const SIZE: RenderSize = RenderSize {
        width: 800,
        height: 600,
    };

    const CREATE_ORDER: [Step; 4] = [
        Step::CreateSwapchain,
        Step::CreateTargets,
        Step::CreatePipeline,
        Step::CreateRing,
    ];

    const DESTROY_ORDER: [Step; 4] = [
        Step::DestroyRing,
        Step::DestroyPipeline,
        Step::DestroyTargets,
        Step::DestroySwapchain,
    ];

    fn built(image_counts: &[usize]) -> (MockParts, Option<SwapchainBundle<MockParts>>) {
        let mut parts = MockParts::new(image_counts);
        let mut slot = None;
        install_bundle(&mut parts, &mut slot, SIZE, 0).unwrap();
        parts.steps.clear();
        (parts, slot)
    }

    #[test]
    fn three_images_give_three_framebuffers_slots_and_sets() {
        let mut parts = MockParts::new(&[3]);
        let mut slot = None;
        let count = install_bundle(&mut parts, &mut slot, SIZE, 0).unwrap();

        assert_eq!(count, 3);
        let bundle = slot.as_ref().unwrap();
        assert_eq!(bundle.image_count(), 3);
        assert_eq!(bundle.ring.framebuffers, 3);
        assert_eq!(bundle.ring.slots, 3);
        assert_eq!(parts.sets, 3);

        let mut expected = CREATE_ORDER.to_vec();
        expected.push(Step::RebuildSets(3));
        assert_eq!(parts.steps, expected);
    }

    #[test]
    fn recreate_tears_down_in_reverse_and_rebuilds_each_piece_once() {
        let (mut parts, mut slot) = built(&[3, 3]);
        let status = recreate_bundle(&mut parts, &mut slot, SIZE).unwrap();
        assert_eq!(status, RecreateStatus::Rebuilt { image_count: 3 });

        let mut expected = vec![Step::WaitIdle];
        expected.extend(DESTROY_ORDER);
        expected.extend(CREATE_ORDER);
        // Same image count: the descriptor sets are left alone.
        assert_eq!(parts.steps, expected);
        assert_eq!(parts.sets, 3);
        assert_eq!(parts.live, 4);
    }

    #[test]
    fn set_count_follows_image_count_across_recreate() {
        let (mut parts, mut slot) = built(&[3, 2]);
        let status = recreate_bundle(&mut parts, &mut slot, SIZE).unwrap();
        assert_eq!(status, RecreateStatus::Rebuilt { image_count: 2 });

        assert_eq!(parts.steps.last(), Some(&Step::RebuildSets(2)));
        assert_eq!(parts.sets, 2);
        let bundle = slot.as_ref().unwrap();
        assert_eq!(bundle.ring.slots, 2);
        assert_eq!(bundle.ring.framebuffers, 2);
    }

    #[test]
    fn zero_surface_extent_defers_without_teardown() {
        let (mut parts, mut slot) = built(&[3]);
        parts.extent = (0, 0);
        let status = recreate_bundle(&mut parts, &mut slot, SIZE).unwrap();

        assert_eq!(status, RecreateStatus::Deferred);
        assert_eq!(parts.steps, vec![Step::WaitIdle]);
        assert!(slot.is_some());
        assert_eq!(parts.live, 4);
    }

    #[test]
    fn failed_pipeline_releases_new_swapchain_and_targets() {
        let (mut parts, mut slot) = built(&[3, 3]);
        parts.fail_pipeline = true;
        let err = recreate_bundle(&mut parts, &mut slot, SIZE).unwrap_err();

        assert!(format!("{err:#}").contains("graphics pipeline"));
        assert!(slot.is_none());
        assert_eq!(parts.live, 0);
        assert_eq!(
            &parts.steps[parts.steps.len() - 5..],
            &[
                Step::CreateSwapchain,
                Step::CreateTargets,
                Step::CreatePipeline,
                Step::DestroyTargets,
                Step::DestroySwapchain,
            ]
        );
    }
}
