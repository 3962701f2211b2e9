// SPDX-License-Identifier: CEPL-1.0
//! Per-tick state machine: wait → acquire → record → submit → present, with
//! a detour through Recreate whenever the swapchain stops matching the
//! surface. GPU work is behind `FrameBackend` so the ordering can be driven
//! without a device.

use anyhow::{anyhow, Result};
use shuttle_render::{FrameOutcome, RenderSize};
use tracing::{debug, error, trace, warn};

use crate::frame_ring::{AcquireStatus, PresentStatus, SlotCursor};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
    Recreate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitStatus {
    Ready,
    TimedOut,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecreateStatus {
    Rebuilt { image_count: usize },
    /// Surface has zero extent; nothing was torn down.
    Deferred,
}

/// GPU side of one frame. Implementations own every Vulkan object; the
/// driver only decides order.
pub trait FrameBackend {
    fn image_count(&self) -> usize;
    /// Blocks on the slot's fence.
    fn wait_for_slot(&mut self, slot: usize, timeout_ns: u64) -> Result<WaitStatus>;
    fn acquire(&mut self, slot: usize) -> AcquireStatus;
    /// Resets the slot fence, then re-records its command buffer for `image_index`.
    fn record(&mut self, slot: usize, image_index: u32) -> Result<()>;
    fn submit(&mut self, slot: usize) -> Result<()>;
    fn present(&mut self, slot: usize, image_index: u32) -> PresentStatus;
    fn recreate(&mut self, size: RenderSize) -> Result<RecreateStatus>;
}

pub struct FrameDriver {
    cursor: SlotCursor,
    state: FrameState,
    size: RenderSize,
    resize_requested: bool,
    fence_timeout_ns: u64,
}

impl FrameDriver {
    pub fn new(image_count: usize, size: RenderSize, fence_timeout_ns: u64) -> Self {
        Self {
            cursor: SlotCursor::new(image_count),
            state: FrameState::Idle,
            size,
            resize_requested: false,
            fence_timeout_ns,
        }
    }

    /// Latches the new size; the rebuild happens on the next tick.
    pub fn request_resize(&mut self, size: RenderSize) {
        self.size = size;
        self.resize_requested = true;
    }

    pub fn size(&self) -> RenderSize {
        self.size
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn cursor(&self) -> &SlotCursor {
        &self.cursor
    }

    pub fn frame_count(&self) -> u64 {
        self.cursor.frame_count()
    }

    pub fn resize_pending(&self) -> bool {
        self.resize_requested
    }

    fn enter(&mut self, next: FrameState) {
        trace!("frame {}: {:?} -> {:?}", self.cursor.frame_count(), self.state, next);
        self.state = next;
    }

    pub fn tick<B: FrameBackend>(&mut self, backend: &mut B) -> Result<FrameOutcome> {
        // Minimized: no GPU work and no rebuild until the size is non-zero.
        if self.size.is_zero_area() {
            self.enter(FrameState::Idle);
            return Ok(FrameOutcome::Paused);
        }

        self.enter(FrameState::Idle);
        let slot = self.cursor.current_slot();
        if backend.wait_for_slot(slot, self.fence_timeout_ns)? == WaitStatus::TimedOut {
            warn!("slot {slot}: fence wait timed out, skipping frame");
            return Ok(FrameOutcome::Skipped);
        }

        self.enter(FrameState::Acquiring);
        if self.resize_requested {
            return self.recreate(backend);
        }
        let image_index = match backend.acquire(slot) {
            AcquireStatus::Acquired {
                index,
                suboptimal: false,
            } => index,
            AcquireStatus::Acquired {
                suboptimal: true, ..
            } => {
                debug!("slot {slot}: acquire suboptimal");
                return self.recreate(backend);
            }
            AcquireStatus::OutOfDate => {
                debug!("slot {slot}: acquire out of date");
                return self.recreate(backend);
            }
            AcquireStatus::Failed(e) => {
                error!("slot {slot}: acquire_next_image failed: {e:?}, skipping frame");
                self.enter(FrameState::Idle);
                return Ok(FrameOutcome::Skipped);
            }
        };

        self.enter(FrameState::Recording);
        backend.record(slot, image_index)?;

        self.enter(FrameState::Submitted);
        backend.submit(slot)?;

        self.enter(FrameState::Presenting);
        let status = backend.present(slot, image_index);
        // Present was issued; the slot is in flight whatever the status.
        self.cursor.advance();

        if status.needs_recreate() {
            debug!("image {image_index}: present {status:?}");
            return self.recreate(backend);
        }
        self.enter(FrameState::Idle);
        match status {
            PresentStatus::Failed(e) => Err(anyhow!("queue_present failed: {e:?}")),
            _ => Ok(FrameOutcome::Presented),
        }
    }

    fn recreate<B: FrameBackend>(&mut self, backend: &mut B) -> Result<FrameOutcome> {
        self.enter(FrameState::Recreate);
        let status = backend.recreate(self.size)?;
        self.enter(FrameState::Idle);
        match status {
            // The surface is gone even though the window still reports a size.
            // Pause until the next resize so the caller can sleep on events.
            RecreateStatus::Deferred => {
                self.size = RenderSize {
                    width: 0,
                    height: 0,
                };
                self.resize_requested = true;
                Ok(FrameOutcome::Paused)
            }
            RecreateStatus::Rebuilt { image_count } => {
                self.resize_requested = false;
                self.cursor.set_image_count(image_count);
                Ok(FrameOutcome::Recreated)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swapchain::SwapchainPlan;
    use ash::vk;
    use shuttle_core::PresentModePref;
    use std::collections::VecDeque;

    #[derive(Clone, Debug, PartialEq, Eq)]
    enum Ev {
        Wait(usize),
        Acquire(usize),
        Record(usize, u32),
        Submit(usize),
        Present(usize, u32),
        Recreate(RenderSize),
    }

    /// Fences modelled as "ticks until signaled"; `record` panics if it runs
    /// on a slot whose fence was not waited to completion.
    struct MockBackend {
        image_count: usize,
        next_image: u32,
        fence_signaled: Vec<bool>,
        fence_remaining: Vec<u32>,
        completion_delays: VecDeque<u32>,
        acquire_script: VecDeque<AcquireStatus>,
        present_script: VecDeque<PresentStatus>,
        recreate_script: VecDeque<RecreateStatus>,
        wait_script: VecDeque<WaitStatus>,
        events: Vec<Ev>,
        rebuilds: usize,
    }

    impl MockBackend {
        fn new(image_count: usize) -> Self {
            Self {
                image_count,
                next_image: 0,
                fence_signaled: vec![true; image_count],
                fence_remaining: vec![0; image_count],
                completion_delays: VecDeque::new(),
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                recreate_script: VecDeque::new(),
                wait_script: VecDeque::new(),
                events: Vec::new(),
                rebuilds: 0,
            }
        }

        fn resize_slots(&mut self, n: usize) {
            self.image_count = n;
            self.fence_signaled = vec![true; n];
            self.fence_remaining = vec![0; n];
            self.next_image = 0;
        }
    }

    impl FrameBackend for MockBackend {
        fn image_count(&self) -> usize {
            self.image_count
        }

        fn wait_for_slot(&mut self, slot: usize, _timeout_ns: u64) -> Result<WaitStatus> {
            self.events.push(Ev::Wait(slot));
            if let Some(w) = self.wait_script.pop_front() {
                if w == WaitStatus::TimedOut {
                    return Ok(w);
                }
            }
            // Block until the simulated GPU finishes.
            while !self.fence_signaled[slot] {
                if self.fence_remaining[slot] == 0 {
                    self.fence_signaled[slot] = true;
                } else {
                    self.fence_remaining[slot] -= 1;
                }
            }
            Ok(WaitStatus::Ready)
        }

        fn acquire(&mut self, slot: usize) -> AcquireStatus {
            self.events.push(Ev::Acquire(slot));
            if let Some(s) = self.acquire_script.pop_front() {
                return s;
            }
            let index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count as u32;
            AcquireStatus::Acquired {
                index,
                suboptimal: false,
            }
        }

        fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
            assert!(
                self.fence_signaled[slot],
                "slot {slot} re-recorded while its fence is unsignaled"
            );
            assert!((image_index as usize) < self.image_count);
            // reset
            self.fence_signaled[slot] = false;
            self.events.push(Ev::Record(slot, image_index));
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> Result<()> {
            self.events.push(Ev::Submit(slot));
            self.fence_remaining[slot] = self.completion_delays.pop_front().unwrap_or(0);
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> PresentStatus {
            self.events.push(Ev::Present(slot, image_index));
            self.present_script
                .pop_front()
                .unwrap_or(PresentStatus::Presented)
        }

        fn recreate(&mut self, size: RenderSize) -> Result<RecreateStatus> {
            self.events.push(Ev::Recreate(size));
            let status = self
                .recreate_script
                .pop_front()
                .unwrap_or(RecreateStatus::Rebuilt {
                    image_count: self.image_count,
                });
            if let RecreateStatus::Rebuilt { image_count } = status {
                self.rebuilds += 1;
                self.resize_slots(image_count);
            }
            Ok(status)
        }
    }

    const SIZE: RenderSize = RenderSize {
        width: 800,
        height: 600,
    };

    fn driver(backend: &MockBackend) -> FrameDriver {
        FrameDriver::new(backend.image_count(), SIZE, u64::MAX)
    }

    fn recorded_slots(events: &[Ev]) -> Vec<usize> {
        events
            .iter()
            .filter_map(|e| match e {
                Ev::Record(s, _) => Some(*s),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn every_slot_visited_once_per_cycle() {
        let mut be = MockBackend::new(3);
        let mut d = driver(&be);
        for _ in 0..6 {
            assert_eq!(d.tick(&mut be).unwrap(), FrameOutcome::Presented);
        }
        let slots = recorded_slots(&be.events);
        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2]);
        for cycle in slots.chunks(3) {
            let mut sorted = cycle.to_vec();
            sorted.sort();
            assert_eq!(sorted, vec![0, 1, 2]);
        }
        assert_eq!(d.frame_count(), 6);
        assert_eq!(d.state(), FrameState::Idle);
    }

    #[test]
    fn wait_precedes_record_under_delayed_completion() {
        let mut be = MockBackend::new(3);
        be.completion_delays = [5, 0, 17, 3, 9, 1, 0, 12, 4, 8, 2, 30]
            .into_iter()
            .collect();
        let mut d = driver(&be);
        for _ in 0..12 {
            assert_eq!(d.tick(&mut be).unwrap(), FrameOutcome::Presented);
        }
        // Each frame is exactly Wait, Acquire, Record, Submit, Present on one slot.
        for frame in be.events.chunks(5) {
            let Ev::Wait(slot) = frame[0] else {
                panic!("frame does not start with a wait: {frame:?}");
            };
            assert_eq!(frame[1], Ev::Acquire(slot));
            assert!(matches!(frame[2], Ev::Record(s, _) if s == slot));
            assert_eq!(frame[3], Ev::Submit(slot));
            assert!(matches!(frame[4], Ev::Present(s, _) if s == slot));
        }
    }

    #[test]
    fn zero_size_pauses_without_recreate() {
        let mut be = MockBackend::new(3);
        let mut d = driver(&be);
        d.request_resize(RenderSize {
            width: 0,
            height: 0,
        });
        for _ in 0..3 {
            assert_eq!(d.tick(&mut be).unwrap(), FrameOutcome::Paused);
        }
        assert!(be.events.is_empty());
        assert!(d.resize_pending());

        d.request_resize(SIZE);
        assert_eq!(d.tick(&mut be).unwrap(), FrameOutcome::Recreated);
        assert_eq!(be.rebuilds, 1);
        assert!(!d.resize_pending());
        assert_eq!(d.tick(&mut be).unwrap(), FrameOutcome::Presented);
    }

    #[test]
    fn deferred_recreate_pauses_until_next_resize() {
        let mut be = MockBackend::new(3);
        be.recreate_script.push_back(RecreateStatus::Deferred);
        let mut d = driver(&be);
        d.request_resize(SIZE);
        assert_eq!(d.tick(&mut be).unwrap(), FrameOutcome::Paused);
        assert!(d.resize_pending());
        assert_eq!(be.rebuilds, 0);

        // No busy retry: further ticks touch nothing until a new size arrives.
        let seen = be.events.len();
        for _ in 0..3 {
            assert_eq!(d.tick(&mut be).unwrap(), FrameOutcome::Paused);
        }
        assert_eq!(be.events.len(), seen);
        assert!(d.size().is_zero_area());

        d.request_resize(SIZE);
        assert_eq!(d.tick(&mut be).unwrap(), FrameOutcome::Recreated);
        assert_eq!(be.rebuilds, 1);
        assert!(!d.resize_pending());
    }

    #[test]
    fn initial_800x600_with_three_images() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        };
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        let plan = SwapchainPlan::new(
            &caps,
            &formats,
            &[vk::PresentModeKHR::FIFO],
            vk::Extent2D {
                width: 800,
                height: 600,
            },
            PresentModePref::Fifo,
        )
        .unwrap();
        assert_eq!(plan.min_image_count, 3);

        let mut be = MockBackend::new(plan.min_image_count as usize);
        let mut d = driver(&be);
        assert_eq!(d.cursor().image_count(), 3);
        assert_eq!(d.tick(&mut be).unwrap(), FrameOutcome::Presented);
        let first = be
            .events
            .iter()
            .find_map(|e| match e {
                Ev::Record(_, idx) => Some(*idx),
                _ => None,
            })
            .unwrap();
        assert!(first < 3);
    }

    #[test]
    fn out_of_date_acquire_rebuilds_once_and_keeps_counter() {
        let mut be = MockBackend::new(3);
        let mut d = driver(&be);
        assert_eq!(d.tick(&mut be).unwrap(), FrameOutcome::Presented);
        let before = d.frame_count();

        be.acquire_script.push_back(AcquireStatus::OutOfDate);
        assert_eq!(d.tick(&mut be).unwrap(), FrameOutcome::Recreated);
        assert_eq!(be.rebuilds, 1);
        assert_eq!(d.frame_count(), before);
        let recreates = be
            .events
            .iter()
            .filter(|e| matches!(e, Ev::Recreate(_)))
            .count();
        assert_eq!(recreates, 1);

        assert_eq!(d.tick(&mut be).unwrap(), FrameOutcome::Presented);
        assert_eq!(d.frame_count(), before + 1);
        assert_eq!(be.rebuilds, 1);
    }

    #[test]
    fn suboptimal_acquire_recreates_without_recording() {
        let mut be = MockBackend::new(2);
        be.acquire_script.push_back(AcquireStatus::Acquired {
            index: 1,
            suboptimal: true,
        });
        let mut d = driver(&be);
        assert_eq!(d.tick(&mut be).unwrap(), FrameOutcome::Recreated);
        assert!(recorded_slots(&be.events).is_empty());
        assert_eq!(d.frame_count(), 0);
    }

    #[test]
    fn acquire_failure_skips_frame() {
        let mut be = MockBackend::new(3);
        be.acquire_script
            .push_back(AcquireStatus::Failed(vk::Result::ERROR_SURFACE_LOST_KHR));
        let mut d = driver(&be);
        assert_eq!(d.tick(&mut be).unwrap(), FrameOutcome::Skipped);
        assert_eq!(d.frame_count(), 0);
        assert!(recorded_slots(&be.events).is_empty());
        assert_eq!(be.rebuilds, 0);
    }

    #[test]
    fn fence_timeout_skips_before_acquire() {
        let mut be = MockBackend::new(3);
        be.wait_script.push_back(WaitStatus::TimedOut);
        let mut d = FrameDriver::new(3, SIZE, 1_000_000);
        assert_eq!(d.tick(&mut be).unwrap(), FrameOutcome::Skipped);
        assert_eq!(be.events, vec![Ev::Wait(0)]);
        assert_eq!(d.frame_count(), 0);
        assert_eq!(d.tick(&mut be).unwrap(), FrameOutcome::Presented);
    }

    #[test]
    fn present_out_of_date_recreates_after_advancing() {
        let mut be = MockBackend::new(3);
        be.present_script.push_back(PresentStatus::OutOfDate);
        let mut d = driver(&be);
        assert_eq!(d.tick(&mut be).unwrap(), FrameOutcome::Recreated);
        assert_eq!(d.frame_count(), 1);
        assert_eq!(be.rebuilds, 1);
        assert!(matches!(be.events.last(), Some(Ev::Recreate(_))));
    }

    #[test]
    fn present_device_lost_is_an_error() {
        let mut be = MockBackend::new(3);
        be.present_script
            .push_back(PresentStatus::Failed(vk::Result::ERROR_DEVICE_LOST));
        let mut d = driver(&be);
        let err = d.tick(&mut be).unwrap_err();
        assert!(err.to_string().contains("ERROR_DEVICE_LOST"));
        assert_eq!(be.rebuilds, 0);
    }

    #[test]
    fn resize_flag_is_honored_before_acquire() {
        let mut be = MockBackend::new(3);
        let mut d = driver(&be);
        let bigger = RenderSize {
            width: 1024,
            height: 768,
        };
        d.request_resize(bigger);
        assert_eq!(d.tick(&mut be).unwrap(), FrameOutcome::Recreated);
        assert_eq!(be.events, vec![Ev::Wait(0), Ev::Recreate(bigger)]);
        assert_eq!(d.size(), bigger);
    }

    #[test]
    fn image_count_change_moves_cursor_not_counter() {
        let mut be = MockBackend::new(3);
        let mut d = driver(&be);
        for _ in 0..4 {
            d.tick(&mut be).unwrap();
        }
        be.recreate_script
            .push_back(RecreateStatus::Rebuilt { image_count: 2 });
        d.request_resize(SIZE);
        assert_eq!(d.tick(&mut be).unwrap(), FrameOutcome::Recreated);
        assert_eq!(d.frame_count(), 4);
        assert_eq!(d.cursor().image_count(), 2);

        be.events.clear();
        for _ in 0..4 {
            assert_eq!(d.tick(&mut be).unwrap(), FrameOutcome::Presented);
        }
        assert_eq!(recorded_slots(&be.events), vec![0, 1, 0, 1]);
    }
}
