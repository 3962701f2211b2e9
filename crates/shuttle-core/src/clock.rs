// SPDX-License-Identifier: CEPL-1.0
use std::time::{Duration, Instant};

/// Per-frame timing owned by whoever drives the loop.
#[derive(Debug)]
pub struct FrameClock {
    frame_begin: Option<Instant>,
    last_frame: Duration,
    frames_in_window: u32,
    window_start: Instant,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    fn starting_at(now: Instant) -> Self {
        Self {
            frame_begin: None,
            last_frame: Duration::ZERO,
            frames_in_window: 0,
            window_start: now,
        }
    }

    pub fn begin_frame(&mut self) {
        self.frame_begin = Some(Instant::now());
    }

    /// Closes the frame opened by `begin_frame`. `presented` frames count toward fps.
    pub fn end_frame(&mut self, presented: bool) {
        if let Some(begin) = self.frame_begin.take() {
            self.last_frame = begin.elapsed();
        }
        if presented {
            self.frames_in_window = self.frames_in_window.saturating_add(1);
        }
    }

    /// CPU time spent in the last completed frame.
    pub fn last_frame_time(&self) -> Duration {
        self.last_frame
    }

    /// Returns the presented-frame rate once at least a second has passed, then restarts the window.
    pub fn poll_fps(&mut self) -> Option<f32> {
        self.poll_fps_at(Instant::now())
    }

    fn poll_fps_at(&mut self, now: Instant) -> Option<f32> {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < Duration::from_secs(1) {
            return None;
        }
        let fps = self.frames_in_window as f32 / elapsed.as_secs_f32();
        self.frames_in_window = 0;
        self.window_start = now;
        Some(fps)
    }

    /// Drops the current fps window, e.g. while paused.
    pub fn reset_window(&mut self) {
        self.frames_in_window = 0;
        self.window_start = Instant::now();
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}
