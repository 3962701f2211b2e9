// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::vk;
use shuttle_render::{MeshData, Vertex};
use std::mem::{offset_of, size_of};

use crate::bootstrap::GpuContext;
use crate::memory::{upload_buffer, AllocatedBuffer};

/// Binding 0, one `Vertex` per vertex.
pub fn vertex_bindings() -> Vec<vk::VertexInputBindingDescription> {
    vec![vk::VertexInputBindingDescription {
        binding: 0,
        stride: size_of::<Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    }]
}

/// Locations follow the vertex shader: position, normal, color, uv.
pub fn vertex_attributes() -> Vec<vk::VertexInputAttributeDescription> {
    let attr = |location, format, offset: usize| vk::VertexInputAttributeDescription {
        location,
        binding: 0,
        format,
        offset: offset as u32,
    };
    vec![
        attr(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, position)),
        attr(1, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, normal)),
        attr(2, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, color)),
        attr(3, vk::Format::R32G32_SFLOAT, offset_of!(Vertex, uv)),
    ]
}

/// Device-local vertex + index buffers, uploaded once.
pub struct MeshBuffers {
    pub vertex: AllocatedBuffer,
    pub index: AllocatedBuffer,
    pub index_count: u32,
}

impl MeshBuffers {
    pub unsafe fn upload(ctx: &GpuContext, mesh: &MeshData) -> Result<Self> {
        let vertex = upload_buffer(
            ctx,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(&mesh.vertices),
        )
        .context("vertex buffer")?;
        let index = upload_buffer(
            ctx,
            vk::BufferUsageFlags::INDEX_BUFFER,
            bytemuck::cast_slice(&mesh.indices),
        )
        .context("index buffer")?;
        Ok(Self {
            vertex,
            index,
            index_count: mesh.index_count(),
        })
    }

    pub unsafe fn bind(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex.buffer], &[0]);
        device.cmd_bind_index_buffer(cmd, self.index.buffer, 0, vk::IndexType::UINT32);
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        self.vertex.destroy(device);
        self.index.destroy(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_matches_vertex_size() {
        let b = vertex_bindings();
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].stride, 44);
    }

    #[test]
    fn attributes_are_packed_in_order() {
        let a = vertex_attributes();
        let offsets: Vec<u32> = a.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24, 36]);
        let locations: Vec<u32> = a.iter().map(|a| a.location).collect();
        assert_eq!(locations, vec![0, 1, 2, 3]);
        assert_eq!(a[3].format, vk::Format::R32G32_SFLOAT);
        assert!(a.iter().all(|a| a.binding == 0));
    }
}
