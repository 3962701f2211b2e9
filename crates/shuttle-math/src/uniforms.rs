// SPDX-License-Identifier: CEPL-1.0
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// `layout(set = 0, binding = 0) uniform Camera { mat4 model; mat4 view; mat4 proj; }`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CameraUniform {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
}

impl CameraUniform {
    pub fn new(model: Mat4, view: Mat4, proj: Mat4) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            view: view.to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Light {
    pub position: Vec3,
    pub color: Vec3,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            position: Vec3::new(5.0, 12.0, 0.0),
            color: Vec3::ONE,
        }
    }
}

/// std140: each vec3 occupies a full 16-byte slot.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct LightUniform {
    pub position: [f32; 4],
    pub color: [f32; 4],
}

impl From<Light> for LightUniform {
    fn from(l: Light) -> Self {
        Self {
            position: l.position.extend(1.0).to_array(),
            color: l.color.extend(1.0).to_array(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn std140_sizes() {
        assert_eq!(std::mem::size_of::<CameraUniform>(), 3 * 64);
        assert_eq!(std::mem::size_of::<LightUniform>(), 32);
    }

    #[test]
    fn camera_uniform_is_column_major() {
        let m = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let u = CameraUniform::new(m, Mat4::IDENTITY, Mat4::IDENTITY);
        assert_eq!(u.model[3], [1.0, 2.0, 3.0, 1.0]);
    }

    #[test]
    fn light_pads_vec3() {
        let u = LightUniform::from(Light::default());
        assert_eq!(u.position, [5.0, 12.0, 0.0, 1.0]);
        assert_eq!(u.color, [1.0, 1.0, 1.0, 1.0]);
    }
}
