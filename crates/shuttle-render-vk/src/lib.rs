// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: swapchain lifecycle, per-frame sync and the frame loop.

use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use shuttle_core::RenderConfig;
use shuttle_render::{FrameOutcome, MeshData, RenderSize, Renderer, SceneState, TextureData};
use tracing::info;

pub mod bootstrap;
mod chain;
pub mod descriptors;
mod error;
pub mod frame_driver;
pub mod frame_ring;
pub mod memory;
pub mod mesh;
pub mod pipeline;
pub mod render_target;
mod resources;
pub mod shader;
pub mod swapchain;
pub mod texture;

pub use error::RenderError;
pub use frame_driver::{FrameBackend, FrameDriver, FrameState};
pub use pipeline::PipelineConfigError;

use resources::VkResources;

pub struct VkRenderer {
    res: VkResources,
    driver: FrameDriver,
}

impl VkRenderer {
    /// Builds every GPU object up front. Any failure here is fatal.
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        cfg: &RenderConfig,
        mesh: &MeshData,
        texture: &TextureData,
        scene: SceneState,
    ) -> Result<Self> {
        let res = unsafe { VkResources::new(window, display, size, cfg, mesh, texture, scene)? };
        let driver = FrameDriver::new(res.image_count(), size, cfg.fence_timeout_ns());
        info!(
            "vk renderer: {} frame slots, {} descriptor sets",
            res.image_count(),
            res.descriptor_set_count()
        );
        Ok(Self { res, driver })
    }

    pub fn frame_count(&self) -> u64 {
        self.driver.frame_count()
    }

    pub fn image_count(&self) -> usize {
        self.res.image_count()
    }

    pub fn state(&self) -> FrameState {
        self.driver.state()
    }
}

impl Renderer for VkRenderer {
    fn resize(&mut self, size: RenderSize) {
        self.driver.request_resize(size);
    }

    fn render(&mut self) -> Result<FrameOutcome> {
        self.driver.tick(&mut self.res)
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.res.clear_color = rgba;
    }

    fn scene_mut(&mut self) -> &mut SceneState {
        &mut self.res.scene
    }
}
