// SPDX-License-Identifier: CEPL-1.0
//! Value types shared between the renderer and the app: camera, light and
//! the std140 uniform blocks uploaded from them.

mod camera;
mod uniforms;

pub use camera::ArcBallCamera;
pub use glam::{Mat4, Vec3};
pub use uniforms::{CameraUniform, Light, LightUniform};

/// Everything the frame loop reads to fill uniforms. Owned by the renderer.
#[derive(Clone, Debug)]
pub struct SceneState {
    pub camera: ArcBallCamera,
    pub light: Light,
    pub model: Mat4,
}

impl Default for SceneState {
    fn default() -> Self {
        Self {
            camera: ArcBallCamera::default(),
            light: Light::default(),
            model: Mat4::IDENTITY,
        }
    }
}

impl SceneState {
    /// Camera block for a target of `width`x`height` pixels.
    pub fn camera_uniform(&self, width: u32, height: u32) -> CameraUniform {
        let aspect = width.max(1) as f32 / height.max(1) as f32;
        CameraUniform::new(
            self.model,
            self.camera.view_matrix(),
            self.camera.projection_matrix(aspect),
        )
    }
}
