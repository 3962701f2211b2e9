// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;

pub mod assets;

pub use assets::{MeshData, TextureData, Vertex};
pub use shuttle_math::SceneState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_zero_area(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// What one `render()` tick ended up doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Submitted and handed to the presentation engine.
    Presented,
    /// Swapchain-dependent resources were rebuilt; nothing was drawn.
    Recreated,
    /// Frame dropped (acquire failure, fence timeout); counter unchanged.
    Skipped,
    /// Framebuffer has zero area; nothing happens until it grows again.
    Paused,
}

pub trait Renderer {
    /// Latches a resize; the rebuild happens on the next `render()`.
    fn resize(&mut self, size: RenderSize);
    fn render(&mut self) -> Result<FrameOutcome>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
    fn scene_mut(&mut self) -> &mut SceneState;
}
