// SPDX-License-Identifier: CEPL-1.0
//! Descriptor layout, pool and one set per frame slot.
//!
//! Set `i` points at camera buffer `i`; only slot `i` writes that buffer, and
//! only after slot `i`'s fence has been waited. The light buffer and the
//! texture are shared by every set and never change after creation.

use anyhow::{bail, Context, Result};
use ash::vk;
use shuttle_math::{CameraUniform, LightUniform};
use std::mem::size_of;
use tracing::debug;

use crate::bootstrap::GpuContext;
use crate::error::RenderError;
use crate::memory::AllocatedBuffer;
use crate::texture::Texture;

pub const CAMERA_BINDING: u32 = 0;
pub const TEXTURE_BINDING: u32 = 1;
pub const LIGHT_BINDING: u32 = 2;

pub fn layout_bindings() -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
    let binding = |binding, descriptor_type, stage_flags| vk::DescriptorSetLayoutBinding {
        binding,
        descriptor_type,
        descriptor_count: 1,
        stage_flags,
        ..Default::default()
    };
    vec![
        binding(
            CAMERA_BINDING,
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::ShaderStageFlags::VERTEX,
        ),
        binding(
            TEXTURE_BINDING,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::FRAGMENT,
        ),
        binding(
            LIGHT_BINDING,
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::ShaderStageFlags::FRAGMENT,
        ),
    ]
}

/// Two uniform buffers and one sampler per set.
pub fn pool_sizes(set_count: u32) -> [vk::DescriptorPoolSize; 2] {
    [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 2 * set_count,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: set_count,
        },
    ]
}

unsafe fn create_set_layout(device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
    let bindings = layout_bindings();
    let ci = vk::DescriptorSetLayoutCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
        binding_count: bindings.len() as u32,
        p_bindings: bindings.as_ptr(),
        ..Default::default()
    };
    Ok(device
        .create_descriptor_set_layout(&ci, None)
        .map_err(RenderError::vk("vkCreateDescriptorSetLayout"))?)
}

pub struct DescriptorBinder {
    /// Outlives rebuilds so pipeline layouts built against it stay valid.
    pub layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
    camera: Vec<AllocatedBuffer>,
    light: AllocatedBuffer,
}

impl DescriptorBinder {
    /// Layout and light buffer only; sets come from `rebuild`.
    pub unsafe fn create(ctx: &GpuContext, light: LightUniform) -> Result<Self> {
        let layout = create_set_layout(&ctx.device)?;
        let light_buf = AllocatedBuffer::host_visible(
            &ctx.device,
            &ctx.selection.memory,
            size_of::<LightUniform>() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
        )
        .context("light uniform")?;
        light_buf.write(&ctx.device, std::slice::from_ref(&light))?;

        Ok(Self {
            layout,
            pool: vk::DescriptorPool::null(),
            sets: Vec::new(),
            camera: Vec::new(),
            light: light_buf,
        })
    }

    unsafe fn allocate(
        &mut self,
        ctx: &GpuContext,
        set_count: usize,
        texture: &Texture,
    ) -> Result<()> {
        if set_count == 0 {
            bail!("descriptor pool needs at least one set");
        }
        let device = &ctx.device;
        let n = set_count as u32;
        let camera_size = size_of::<CameraUniform>() as vk::DeviceSize;

        // 1) One camera UBO per slot
        for _ in 0..set_count {
            self.camera.push(
                AllocatedBuffer::host_visible(
                    device,
                    &ctx.selection.memory,
                    camera_size,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                )
                .context("camera uniform")?,
            );
        }

        // 2) Pool
        let sizes = pool_sizes(n);
        let pool_ci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            flags: vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET,
            max_sets: n,
            pool_size_count: sizes.len() as u32,
            p_pool_sizes: sizes.as_ptr(),
            ..Default::default()
        };
        self.pool = device
            .create_descriptor_pool(&pool_ci, None)
            .map_err(RenderError::vk("vkCreateDescriptorPool"))?;

        // 3) Sets
        let layouts = vec![self.layout; set_count];
        let alloc = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: self.pool,
            descriptor_set_count: n,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        self.sets = device
            .allocate_descriptor_sets(&alloc)
            .map_err(RenderError::vk("vkAllocateDescriptorSets"))?;

        // 4) Writes, once. vkUpdateDescriptorSets reports nothing back.
        let camera_infos: Vec<vk::DescriptorBufferInfo> = self
            .camera
            .iter()
            .map(|b| vk::DescriptorBufferInfo {
                buffer: b.buffer,
                offset: 0,
                range: camera_size,
            })
            .collect();
        let light_info = vk::DescriptorBufferInfo {
            buffer: self.light.buffer,
            offset: 0,
            range: size_of::<LightUniform>() as vk::DeviceSize,
        };
        let image_info = texture.descriptor_info();

        let mut writes = Vec::with_capacity(set_count * 3);
        for (i, &set) in self.sets.iter().enumerate() {
            writes.push(vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set: set,
                dst_binding: CAMERA_BINDING,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                p_buffer_info: &camera_infos[i],
                ..Default::default()
            });
            writes.push(vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set: set,
                dst_binding: TEXTURE_BINDING,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                p_image_info: &image_info,
                ..Default::default()
            });
            writes.push(vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set: set,
                dst_binding: LIGHT_BINDING,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                p_buffer_info: &light_info,
                ..Default::default()
            });
        }
        device.update_descriptor_sets(&writes, &[]);

        debug!("descriptors: {set_count} sets");
        Ok(())
    }

    unsafe fn release(&mut self, device: &ash::Device) {
        self.sets.clear();
        // Frees every set allocated from it.
        device.destroy_descriptor_pool(self.pool, None);
        self.pool = vk::DescriptorPool::null();
        for b in self.camera.drain(..) {
            b.destroy(device);
        }
    }

    /// (Re)allocates per-slot state for `set_count` slots. Device must be idle.
    pub unsafe fn rebuild(
        &mut self,
        ctx: &GpuContext,
        set_count: usize,
        texture: &Texture,
    ) -> Result<()> {
        self.release(&ctx.device);
        self.allocate(ctx, set_count, texture)
    }

    pub(crate) fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn set(&self, slot: usize) -> vk::DescriptorSet {
        self.sets[slot]
    }

    /// Caller must have waited on `slot`'s fence.
    pub unsafe fn write_camera(
        &self,
        device: &ash::Device,
        slot: usize,
        data: &CameraUniform,
    ) -> Result<()> {
        self.camera[slot].write(device, std::slice::from_ref(data))
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        self.release(device);
        self.light.destroy(device);
        device.destroy_descriptor_set_layout(self.layout, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_has_camera_texture_light() {
        let b = layout_bindings();
        assert_eq!(b.len(), 3);
        assert_eq!(b[0].binding, 0);
        assert_eq!(b[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(b[0].stage_flags, vk::ShaderStageFlags::VERTEX);
        assert_eq!(b[1].binding, 1);
        assert_eq!(
            b[1].descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
        assert_eq!(b[1].stage_flags, vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(b[2].binding, 2);
        assert_eq!(b[2].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(b[2].stage_flags, vk::ShaderStageFlags::FRAGMENT);
        assert!(b.iter().all(|b| b.descriptor_count == 1));
    }

    #[test]
    fn pool_holds_three_descriptors_per_set() {
        let sizes = pool_sizes(3);
        let total: u32 = sizes.iter().map(|s| s.descriptor_count).sum();
        assert_eq!(total, 9);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 6);
        assert_eq!(sizes[1].ty, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(sizes[1].descriptor_count, 3);
    }
}
