// SPDX-License-Identifier: CEPL-1.0
//! Buffers, images and their backing allocations. One allocation per
//! resource; nothing here sub-allocates.

use anyhow::{bail, Result};
use ash::vk;
use bytemuck::Pod;

use crate::bootstrap::GpuContext;
use crate::error::RenderError;

/// First memory type allowed by `type_bits` that has every flag in `flags`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..props.memory_type_count).find(|&i| {
        (type_bits & (1 << i)) != 0 && props.memory_types[i as usize].property_flags.contains(flags)
    })
}

unsafe fn allocate(
    device: &ash::Device,
    mem_props: &vk::PhysicalDeviceMemoryProperties,
    req: vk::MemoryRequirements,
    flags: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory> {
    let memory_type_index =
        find_memory_type(mem_props, req.memory_type_bits, flags).ok_or(RenderError::NoMemoryType {
            type_bits: req.memory_type_bits,
            flags,
        })?;
    let mai = vk::MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
        allocation_size: req.size,
        memory_type_index,
        ..Default::default()
    };
    Ok(device
        .allocate_memory(&mai, None)
        .map_err(RenderError::vk("vkAllocateMemory"))?)
}

#[derive(Clone, Copy, Debug)]
pub struct AllocatedBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl AllocatedBuffer {
    pub unsafe fn new(
        device: &ash::Device,
        mem_props: &vk::PhysicalDeviceMemoryProperties,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        if size == 0 {
            bail!("zero-sized buffer ({usage:?})");
        }
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let buffer = device
            .create_buffer(&bci, None)
            .map_err(RenderError::vk("vkCreateBuffer"))?;
        let req = device.get_buffer_memory_requirements(buffer);
        let memory = match allocate(device, mem_props, req, flags) {
            Ok(m) => m,
            Err(e) => {
                device.destroy_buffer(buffer, None);
                return Err(e);
            }
        };
        device
            .bind_buffer_memory(buffer, memory, 0)
            .map_err(RenderError::vk("vkBindBufferMemory"))?;
        Ok(Self {
            buffer,
            memory,
            size,
        })
    }

    /// Host-visible + coherent, used for per-frame uniforms and staging.
    pub unsafe fn host_visible(
        device: &ash::Device,
        mem_props: &vk::PhysicalDeviceMemoryProperties,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self> {
        Self::new(
            device,
            mem_props,
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    /// Map, copy, unmap. The buffer must be host-visible and coherent.
    pub unsafe fn write<T: Pod>(&self, device: &ash::Device, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.len() as vk::DeviceSize > self.size {
            bail!("write of {} bytes into {}-byte buffer", bytes.len(), self.size);
        }
        let ptr = device
            .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
            .map_err(RenderError::vk("vkMapMemory"))?;
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
        device.unmap_memory(self.memory);
        Ok(())
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_buffer(self.buffer, None);
        device.free_memory(self.memory, None);
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub samples: vk::SampleCountFlags,
    pub aspect: vk::ImageAspectFlags,
}

/// Device-local 2D image with a single mip/layer and its view.
#[derive(Clone, Copy, Debug)]
pub struct AllocatedImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
}

pub fn subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

pub unsafe fn create_image_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    let view_ci = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        subresource_range: subresource_range(aspect),
        ..Default::default()
    };
    Ok(device
        .create_image_view(&view_ci, None)
        .map_err(RenderError::vk("vkCreateImageView"))?)
}

impl AllocatedImage {
    pub unsafe fn new(
        device: &ash::Device,
        mem_props: &vk::PhysicalDeviceMemoryProperties,
        desc: &ImageDesc,
    ) -> Result<Self> {
        let img_ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format: desc.format,
            extent: vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: desc.samples,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: desc.usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let image = device
            .create_image(&img_ci, None)
            .map_err(RenderError::vk("vkCreateImage"))?;

        let req = device.get_image_memory_requirements(image);
        let memory = match allocate(device, mem_props, req, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
            Ok(m) => m,
            Err(e) => {
                device.destroy_image(image, None);
                return Err(e);
            }
        };
        device
            .bind_image_memory(image, memory, 0)
            .map_err(RenderError::vk("vkBindImageMemory"))?;

        let view = create_image_view(device, image, desc.format, desc.aspect)?;
        Ok(Self {
            image,
            memory,
            view,
        })
    }

    /// View first, then image, then memory.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_image_view(self.view, None);
        device.destroy_image(self.image, None);
        device.free_memory(self.memory, None);
    }
}

/// Records `record` into a throwaway command buffer from the transient pool,
/// submits it on the graphics queue and waits for the queue to drain.
pub unsafe fn one_time_submit(
    ctx: &GpuContext,
    record: impl FnOnce(&ash::Device, vk::CommandBuffer),
) -> Result<()> {
    let device = &ctx.device;
    let ai = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: ctx.transient_pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: 1,
        ..Default::default()
    };
    let cmd = device
        .allocate_command_buffers(&ai)
        .map_err(RenderError::vk("vkAllocateCommandBuffers"))?[0];
    let bi = vk::CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
        flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
        ..Default::default()
    };
    device
        .begin_command_buffer(cmd, &bi)
        .map_err(RenderError::vk("vkBeginCommandBuffer"))?;
    record(device, cmd);
    device
        .end_command_buffer(cmd)
        .map_err(RenderError::vk("vkEndCommandBuffer"))?;

    let si = vk::SubmitInfo {
        s_type: vk::StructureType::SUBMIT_INFO,
        command_buffer_count: 1,
        p_command_buffers: &cmd,
        ..Default::default()
    };
    device
        .queue_submit(ctx.graphics_queue, std::slice::from_ref(&si), vk::Fence::null())
        .map_err(RenderError::vk("vkQueueSubmit"))?;
    device
        .queue_wait_idle(ctx.graphics_queue)
        .map_err(RenderError::vk("vkQueueWaitIdle"))?;

    device.free_command_buffers(ctx.transient_pool, std::slice::from_ref(&cmd));
    Ok(())
}

/// Host-visible staging buffer pre-filled with `bytes`. Caller destroys it.
pub unsafe fn staging_buffer(ctx: &GpuContext, bytes: &[u8]) -> Result<AllocatedBuffer> {
    let staging = AllocatedBuffer::host_visible(
        &ctx.device,
        &ctx.selection.memory,
        bytes.len() as vk::DeviceSize,
        vk::BufferUsageFlags::TRANSFER_SRC,
    )?;
    staging.write(&ctx.device, bytes)?;
    Ok(staging)
}

/// Device-local buffer filled through a staging copy.
pub unsafe fn upload_buffer(
    ctx: &GpuContext,
    usage: vk::BufferUsageFlags,
    bytes: &[u8],
) -> Result<AllocatedBuffer> {
    let size = bytes.len() as vk::DeviceSize;
    let staging = staging_buffer(ctx, bytes)?;
    let dst = AllocatedBuffer::new(
        &ctx.device,
        &ctx.selection.memory,
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;
    let copied = one_time_submit(ctx, |device, cmd| {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        device.cmd_copy_buffer(cmd, staging.buffer, dst.buffer, std::slice::from_ref(&region));
    });
    staging.destroy(&ctx.device);
    copied?;
    Ok(dst)
}
