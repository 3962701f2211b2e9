// SPDX-License-Identifier: CEPL-1.0
//! Every GPU object the renderer owns, and the Vulkan side of a frame.
//! Recreate sequencing lives in `chain`; this file supplies the Vulkan calls.

use anyhow::{anyhow, Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use shuttle_core::{PresentModePref, RenderConfig};
use shuttle_render::{MeshData, RenderSize, SceneState, TextureData};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::bootstrap::{DeviceRequirements, GpuContext};
use crate::chain::{self, ChainParts};
use crate::descriptors::DescriptorBinder;
use crate::error::RenderError;
use crate::frame_driver::{FrameBackend, RecreateStatus, WaitStatus};
use crate::frame_ring::{AcquireStatus, FrameRing, PresentStatus};
use crate::mesh::{self, MeshBuffers};
use crate::pipeline::{GraphicsPipelineConfig, PipelineState};
use crate::render_target::RenderTargetSet;
use crate::shader::ShaderSet;
use crate::swapchain::SwapchainState;
use crate::texture::Texture;

/// Settings that survive recreation.
#[derive(Clone, Debug)]
struct ChainSettings {
    present_mode: PresentModePref,
    msaa_samples: u32,
    pipeline_cache: Option<PathBuf>,
}

type SwapchainBundle = chain::SwapchainBundle<DeviceResources>;

/// Objects that live as long as the device, plus what a swapchain rebuild
/// needs from them.
struct DeviceResources {
    ctx: GpuContext,
    shaders: ShaderSet,
    texture: Texture,
    binder: DescriptorBinder,
    settings: ChainSettings,
}

impl ChainParts for DeviceResources {
    type Swapchain = SwapchainState;
    type Targets = RenderTargetSet;
    type Pipeline = PipelineState;
    type Ring = FrameRing;

    fn wait_idle(&mut self) {
        unsafe { self.ctx.wait_idle() }
    }

    fn surface_extent(&self) -> Result<(u32, u32)> {
        let caps = unsafe { self.ctx.surface_capabilities()? };
        Ok((caps.current_extent.width, caps.current_extent.height))
    }

    fn image_count(swap: &SwapchainState) -> usize {
        swap.image_count()
    }

    fn create_swapchain(&mut self, size: RenderSize) -> Result<SwapchainState> {
        unsafe {
            SwapchainState::create(
                &self.ctx,
                size.width,
                size.height,
                self.settings.present_mode,
            )
        }
    }

    fn create_targets(&mut self, swap: &SwapchainState) -> Result<RenderTargetSet> {
        unsafe { RenderTargetSet::create(&self.ctx, swap, self.settings.msaa_samples) }
    }

    fn create_pipeline(&mut self, targets: &RenderTargetSet) -> Result<PipelineState> {
        let config = GraphicsPipelineConfig::new(
            self.shaders.stages(),
            mesh::vertex_bindings(),
            mesh::vertex_attributes(),
        )
        .with_samples(targets.plan.samples);
        unsafe {
            PipelineState::build_with_cache(
                &self.ctx.device,
                &config,
                &targets.plan.pass_info(),
                targets.render_pass,
                self.binder.layout,
                self.settings.pipeline_cache.as_deref(),
            )
        }
    }

    fn create_ring(
        &mut self,
        swap: &SwapchainState,
        targets: &RenderTargetSet,
    ) -> Result<FrameRing> {
        unsafe { FrameRing::create(&self.ctx, swap, targets) }
    }

    fn destroy_ring(&mut self, mut ring: FrameRing) {
        unsafe { ring.destroy(&self.ctx.device) }
    }

    fn destroy_pipeline(&mut self, mut pipeline: PipelineState) {
        unsafe { pipeline.destroy(&self.ctx.device) }
    }

    fn destroy_targets(&mut self, mut targets: RenderTargetSet) {
        unsafe { targets.destroy(&self.ctx.device) }
    }

    fn destroy_swapchain(&mut self, mut swap: SwapchainState) {
        unsafe { swap.destroy(&self.ctx) }
    }

    fn descriptor_set_count(&self) -> usize {
        self.binder.len()
    }

    fn rebuild_descriptor_sets(&mut self, count: usize) -> Result<()> {
        unsafe { self.binder.rebuild(&self.ctx, count, &self.texture) }
    }
}

pub struct VkResources {
    gpu: DeviceResources,
    mesh: MeshBuffers,
    chain: Option<SwapchainBundle>,
    pub scene: SceneState,
    pub clear_color: [f32; 4],
}

impl VkResources {
    pub unsafe fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        cfg: &RenderConfig,
        mesh_data: &MeshData,
        texture_data: &TextureData,
        scene: SceneState,
    ) -> Result<Self> {
        let ctx = GpuContext::new(window, display, DeviceRequirements::new(cfg.validation))
            .context("gpu bootstrap")?;
        let shaders = ShaderSet::load(&ctx.device, cfg.shader_dir.as_deref())?;
        let mesh = MeshBuffers::upload(&ctx, mesh_data)?;
        let texture = Texture::upload(&ctx, texture_data)?;

        let settings = ChainSettings {
            present_mode: cfg.present_mode,
            msaa_samples: cfg.msaa_samples,
            pipeline_cache: cfg.pipeline_cache.clone(),
        };

        // Layout first: the pipeline is built against it.
        let binder = DescriptorBinder::create(&ctx, scene.light.into())?;
        let mut res = Self {
            gpu: DeviceResources {
                ctx,
                shaders,
                texture,
                binder,
                settings,
            },
            mesh,
            chain: None,
            scene,
            clear_color: cfg.clear_color,
        };
        // On failure `res` drops here and tears down whatever was built.
        chain::install_bundle(&mut res.gpu, &mut res.chain, size, 0)?;

        let bundle = res.chain()?;
        info!(
            "renderer ready: {} images, {}x{}, {:?} samples",
            bundle.image_count(),
            bundle.swap.extent.width,
            bundle.swap.extent.height,
            bundle.targets.plan.samples
        );
        Ok(res)
    }

    fn chain(&self) -> Result<&SwapchainBundle> {
        self.chain
            .as_ref()
            .ok_or_else(|| anyhow!("swapchain resources are not built"))
    }

    pub fn descriptor_set_count(&self) -> usize {
        self.gpu.binder.len()
    }

    unsafe fn record_commands(&self, slot: usize, image_index: u32) -> Result<()> {
        let chain = self.chain()?;
        let d = &self.gpu.ctx.device;
        let frame = chain.ring.slot(slot);
        let extent = chain.swap.extent;

        // Reset only once an image is in hand; a skipped acquire leaves the fence signaled.
        d.reset_fences(&[frame.fence])
            .map_err(RenderError::vk("vkResetFences"))?;
        d.reset_command_buffer(frame.cmd, vk::CommandBufferResetFlags::empty())
            .map_err(RenderError::vk("vkResetCommandBuffer"))?;

        let camera = self.scene.camera_uniform(extent.width, extent.height);
        self.gpu.binder.write_camera(d, slot, &camera)?;

        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        d.begin_command_buffer(frame.cmd, &begin)
            .map_err(RenderError::vk("vkBeginCommandBuffer"))?;

        let clear = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: chain.targets.render_pass,
            framebuffer: chain.ring.framebuffer(image_index),
            render_area: area,
            clear_value_count: clear.len() as u32,
            p_clear_values: clear.as_ptr(),
            ..Default::default()
        };
        d.cmd_begin_render_pass(frame.cmd, &rp_begin, vk::SubpassContents::INLINE);
        d.cmd_bind_pipeline(
            frame.cmd,
            vk::PipelineBindPoint::GRAPHICS,
            chain.pipeline.pipeline,
        );

        // Dynamic viewport/scissor; the pipeline bakes no extent.
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        d.cmd_set_viewport(frame.cmd, 0, std::slice::from_ref(&viewport));
        d.cmd_set_scissor(frame.cmd, 0, std::slice::from_ref(&area));

        d.cmd_bind_descriptor_sets(
            frame.cmd,
            vk::PipelineBindPoint::GRAPHICS,
            chain.pipeline.layout,
            0,
            &[self.gpu.binder.set(slot)],
            &[],
        );
        self.mesh.bind(d, frame.cmd);
        d.cmd_draw_indexed(frame.cmd, self.mesh.index_count, 1, 0, 0, 0);

        d.cmd_end_render_pass(frame.cmd);
        d.end_command_buffer(frame.cmd)
            .map_err(RenderError::vk("vkEndCommandBuffer"))?;
        Ok(())
    }
}

impl FrameBackend for VkResources {
    fn image_count(&self) -> usize {
        self.chain.as_ref().map_or(0, |c| c.image_count())
    }

    fn wait_for_slot(&mut self, slot: usize, timeout_ns: u64) -> Result<WaitStatus> {
        let fence = self.chain()?.ring.slot(slot).fence;
        match unsafe { self.gpu.ctx.device.wait_for_fences(&[fence], true, timeout_ns) } {
            Ok(()) => Ok(WaitStatus::Ready),
            Err(vk::Result::TIMEOUT) => Ok(WaitStatus::TimedOut),
            Err(e) => Err(RenderError::vk("vkWaitForFences")(e).into()),
        }
    }

    fn acquire(&mut self, slot: usize) -> AcquireStatus {
        match &self.chain {
            Some(c) => unsafe {
                c.ring
                    .acquire_next_image(&self.gpu.ctx, c.swap.swapchain, slot)
            },
            None => AcquireStatus::OutOfDate,
        }
    }

    fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
        unsafe { self.record_commands(slot, image_index) }
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        let frame = *self.chain()?.ring.slot(slot);
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &frame.present_semaphore,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &frame.cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &frame.render_semaphore,
            ..Default::default()
        };
        unsafe {
            self.gpu
                .ctx
                .device
                .queue_submit(
                    self.gpu.ctx.graphics_queue,
                    std::slice::from_ref(&submit),
                    frame.fence,
                )
                .map_err(RenderError::vk("vkQueueSubmit"))?;
        }
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> PresentStatus {
        let Some(chain) = &self.chain else {
            return PresentStatus::OutOfDate;
        };
        let render_semaphore = chain.ring.slot(slot).render_semaphore;
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &render_semaphore,
            swapchain_count: 1,
            p_swapchains: &chain.swap.swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        PresentStatus::from_result(unsafe {
            self.gpu
                .ctx
                .swapchain_loader
                .queue_present(self.gpu.ctx.present_queue, &present)
        })
    }

    fn recreate(&mut self, size: RenderSize) -> Result<RecreateStatus> {
        let status = chain::recreate_bundle(&mut self.gpu, &mut self.chain, size)?;
        if let RecreateStatus::Rebuilt { image_count } = status {
            let bundle = self.chain()?;
            info!(
                "recreated: {}x{}, {} images, {} frame slots",
                bundle.swap.extent.width,
                bundle.swap.extent.height,
                image_count,
                bundle.ring.len()
            );
        }
        Ok(status)
    }
}

// Device idle, then children before the device. GpuContext drops after this
// and takes the device, surface and instance with it.
impl Drop for VkResources {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.gpu.ctx.device.device_wait_idle() {
                warn!("device_wait_idle on shutdown: {e:?}");
            }
            if let Some(bundle) = self.chain.take() {
                bundle.destroy(&mut self.gpu);
            }
            let device = &self.gpu.ctx.device;
            self.gpu.binder.destroy(device);
            self.gpu.texture.destroy(device);
            self.mesh.destroy(device);
            self.gpu.shaders.destroy(device);
        }
    }
}
