// SPDX-License-Identifier: CEPL-1.0
//! Window-side signals the renderer consumes. winit is re-exported so the app
//! only depends on this crate for windowing.

pub use winit;

use winit::dpi::PhysicalSize;

/// Framebuffer size + resize latch + close flag, fed from window events.
#[derive(Debug, Clone)]
pub struct FramebufferTracker {
    width: u32,
    height: u32,
    resized: bool,
    close_requested: bool,
}

impl FramebufferTracker {
    pub fn new(size: PhysicalSize<u32>) -> Self {
        Self {
            width: size.width,
            height: size.height,
            resized: false,
            close_requested: false,
        }
    }

    pub fn on_resized(&mut self, size: PhysicalSize<u32>) {
        if size.width != self.width || size.height != self.height {
            tracing::debug!("framebuffer {}x{} → {}x{}", self.width, self.height, size.width, size.height);
        }
        self.width = size.width;
        self.height = size.height;
        self.resized = true;
    }

    pub fn on_close_requested(&mut self) {
        self.close_requested = true;
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Zero-area framebuffers (minimized windows) must not be rendered or recreated.
    pub fn is_zero_area(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Reads and clears the resize latch.
    pub fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }

    pub fn close_requested(&self) -> bool {
        self.close_requested
    }
}
