// SPDX-License-Identifier: CEPL-1.0
//! Depth buffer, optional multisampled color target and the render pass that
//! ties them to a swapchain image. Extent-bound: rebuilt on every resize.

use anyhow::{anyhow, Context, Result};
use ash::vk;
use tracing::info;

use crate::bootstrap::GpuContext;
use crate::error::RenderError;
use crate::memory::{AllocatedImage, ImageDesc};
use crate::pipeline::RenderPassInfo;
use crate::swapchain::SwapchainState;

/// Preferred order; first one with optimal-tiling depth support wins.
pub const DEPTH_CANDIDATES: [vk::Format; 4] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D16_UNORM,
];

pub fn pick_depth_format(supports_depth: impl Fn(vk::Format) -> bool) -> Option<vk::Format> {
    DEPTH_CANDIDATES.into_iter().find(|&f| supports_depth(f))
}

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

/// Highest count `<= requested` present in `supported`. TYPE_1 is always valid.
pub fn pick_sample_count(requested: u32, supported: vk::SampleCountFlags) -> vk::SampleCountFlags {
    [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .find(|s| s.as_raw() <= requested && supported.contains(*s))
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

/// Attachment graph of the single subpass, independent of any device.
///
/// Attachment indices: with MSAA `0 = color (ms), 1 = depth, 2 = resolve
/// (swapchain)`; without it `0 = swapchain color, 1 = depth`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttachmentPlan {
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
    pub samples: vk::SampleCountFlags,
}

impl AttachmentPlan {
    pub fn multisampled(&self) -> bool {
        self.samples != vk::SampleCountFlags::TYPE_1
    }

    pub fn descriptions(&self) -> Vec<vk::AttachmentDescription> {
        let color = vk::AttachmentDescription {
            format: self.color_format,
            samples: self.samples,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: if self.multisampled() {
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            } else {
                vk::ImageLayout::PRESENT_SRC_KHR
            },
            ..Default::default()
        };
        let depth = vk::AttachmentDescription {
            format: self.depth_format,
            samples: self.samples,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ..Default::default()
        };
        if !self.multisampled() {
            return vec![color, depth];
        }
        let resolve = vk::AttachmentDescription {
            format: self.color_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::DONT_CARE,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        };
        vec![color, depth, resolve]
    }

    pub fn color_ref(&self) -> vk::AttachmentReference {
        vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }
    }

    pub fn depth_ref(&self) -> vk::AttachmentReference {
        vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        }
    }

    pub fn resolve_ref(&self) -> Option<vk::AttachmentReference> {
        self.multisampled().then_some(vk::AttachmentReference {
            attachment: 2,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        })
    }

    /// External → subpass 0: wait for the previous use of color and depth.
    pub fn dependency(&self) -> vk::SubpassDependency {
        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: stages,
            dst_stage_mask: stages,
            src_access_mask: vk::AccessFlags::empty(),
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ..Default::default()
        }
    }

    /// Framebuffer attachment order matching `descriptions`.
    pub fn framebuffer_views(
        &self,
        swap_view: vk::ImageView,
        depth_view: vk::ImageView,
        msaa_view: Option<vk::ImageView>,
    ) -> Vec<vk::ImageView> {
        match msaa_view {
            Some(ms) if self.multisampled() => vec![ms, depth_view, swap_view],
            _ => vec![swap_view, depth_view],
        }
    }

    pub fn pass_info(&self) -> RenderPassInfo {
        RenderPassInfo {
            color_attachment_count: 1,
            samples: self.samples,
        }
    }
}

pub struct RenderTargetSet {
    pub render_pass: vk::RenderPass,
    pub depth: AllocatedImage,
    /// Only present with MSAA.
    pub color: Option<AllocatedImage>,
    pub plan: AttachmentPlan,
}

unsafe fn create_render_pass(
    device: &ash::Device,
    plan: &AttachmentPlan,
) -> Result<vk::RenderPass> {
    let attachments = plan.descriptions();
    let color_ref = plan.color_ref();
    let depth_ref = plan.depth_ref();
    let resolve_ref = plan.resolve_ref();

    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &color_ref,
        p_resolve_attachments: resolve_ref
            .as_ref()
            .map_or(std::ptr::null(), |r| r as *const _),
        p_depth_stencil_attachment: &depth_ref,
        ..Default::default()
    };
    let dependency = plan.dependency();

    let rp_ci = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: attachments.len() as u32,
        p_attachments: attachments.as_ptr(),
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    Ok(device
        .create_render_pass(&rp_ci, None)
        .map_err(RenderError::vk("vkCreateRenderPass"))?)
}

impl RenderTargetSet {
    pub unsafe fn create(
        ctx: &GpuContext,
        swap: &SwapchainState,
        msaa_samples: u32,
    ) -> Result<Self> {
        let depth_format = pick_depth_format(|f| {
            ctx.instance
                .get_physical_device_format_properties(ctx.phys(), f)
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or_else(|| anyhow!("no depth format with optimal-tiling attachment support"))?;

        let limits = &ctx.selection.limits;
        let supported =
            limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;
        let plan = AttachmentPlan {
            color_format: swap.format,
            depth_format,
            samples: pick_sample_count(msaa_samples, supported),
        };

        let depth_aspect = if has_stencil(depth_format) {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        };
        let depth = AllocatedImage::new(
            &ctx.device,
            &ctx.selection.memory,
            &ImageDesc {
                extent: swap.extent,
                format: depth_format,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                samples: plan.samples,
                aspect: depth_aspect,
            },
        )
        .context("depth target")?;

        let color = if plan.multisampled() {
            Some(
                AllocatedImage::new(
                    &ctx.device,
                    &ctx.selection.memory,
                    &ImageDesc {
                        extent: swap.extent,
                        format: swap.format,
                        usage: vk::ImageUsageFlags::COLOR_ATTACHMENT
                            | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
                        samples: plan.samples,
                        aspect: vk::ImageAspectFlags::COLOR,
                    },
                )
                .context("msaa color target")?,
            )
        } else {
            None
        };

        let render_pass = create_render_pass(&ctx.device, &plan)?;

        info!(
            "render targets: depth {:?}, samples {:?} (requested {}), extent {}x{}",
            depth_format,
            plan.samples,
            msaa_samples,
            swap.extent.width,
            swap.extent.height
        );

        Ok(Self {
            render_pass,
            depth,
            color,
            plan,
        })
    }

    pub fn framebuffer_views(&self, swap_view: vk::ImageView) -> Vec<vk::ImageView> {
        self.plan
            .framebuffer_views(swap_view, self.depth.view, self.color.map(|c| c.view))
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        device.destroy_render_pass(self.render_pass, None);
        if let Some(color) = self.color.take() {
            color.destroy(device);
        }
        self.depth.destroy(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn plan(samples: vk::SampleCountFlags) -> AttachmentPlan {
        AttachmentPlan {
            color_format: vk::Format::B8G8R8A8_SRGB,
            depth_format: vk::Format::D32_SFLOAT,
            samples,
        }
    }

    #[test]
    fn msaa_pass_resolves_into_swapchain() {
        let p = plan(vk::SampleCountFlags::TYPE_4);
        let d = p.descriptions();
        assert_eq!(d.len(), 3);

        assert_eq!(d[0].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(d[0].load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(d[0].store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(d[0].final_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        assert_eq!(d[1].format, vk::Format::D32_SFLOAT);
        assert_eq!(d[1].load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(d[1].store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(
            d[1].final_layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );

        assert_eq!(d[2].samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(d[2].load_op, vk::AttachmentLoadOp::DONT_CARE);
        assert_eq!(d[2].store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(d[2].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);

        assert_eq!(p.resolve_ref().map(|r| r.attachment), Some(2));
    }

    #[test]
    fn single_sample_pass_presents_color_directly() {
        let p = plan(vk::SampleCountFlags::TYPE_1);
        let d = p.descriptions();
        assert_eq!(d.len(), 2);
        assert_eq!(d[0].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert!(p.resolve_ref().is_none());
        assert_eq!(p.depth_ref().attachment, 1);
    }

    #[test]
    fn dependency_covers_color_and_depth_writes() {
        let dep = plan(vk::SampleCountFlags::TYPE_4).dependency();
        assert_eq!(dep.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(dep.dst_subpass, 0);
        assert!(dep
            .dst_stage_mask
            .contains(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT));
        assert!(dep
            .dst_stage_mask
            .contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS));
        assert_eq!(
            dep.dst_access_mask,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        );
    }

    #[test]
    fn framebuffer_order_follows_attachment_indices() {
        let swap = vk::ImageView::from_raw(1);
        let depth = vk::ImageView::from_raw(2);
        let ms = vk::ImageView::from_raw(3);
        assert_eq!(
            plan(vk::SampleCountFlags::TYPE_4).framebuffer_views(swap, depth, Some(ms)),
            vec![ms, depth, swap]
        );
        assert_eq!(
            plan(vk::SampleCountFlags::TYPE_1).framebuffer_views(swap, depth, None),
            vec![swap, depth]
        );
    }

    #[test]
    fn depth_format_preference_order() {
        assert_eq!(pick_depth_format(|_| true), Some(vk::Format::D32_SFLOAT));
        assert_eq!(
            pick_depth_format(|f| f != vk::Format::D32_SFLOAT),
            Some(vk::Format::D32_SFLOAT_S8_UINT)
        );
        assert_eq!(
            pick_depth_format(|f| f == vk::Format::D16_UNORM),
            Some(vk::Format::D16_UNORM)
        );
        assert_eq!(pick_depth_format(|_| false), None);
        assert!(has_stencil(vk::Format::D24_UNORM_S8_UINT));
        assert!(!has_stencil(vk::Format::D32_SFLOAT));
    }

    #[test]
    fn sample_count_clamps_to_device() {
        let up_to_8 = vk::SampleCountFlags::TYPE_1
            | vk::SampleCountFlags::TYPE_2
            | vk::SampleCountFlags::TYPE_4
            | vk::SampleCountFlags::TYPE_8;
        assert_eq!(pick_sample_count(4, up_to_8), vk::SampleCountFlags::TYPE_4);
        assert_eq!(pick_sample_count(16, up_to_8), vk::SampleCountFlags::TYPE_8);
        assert_eq!(pick_sample_count(1, up_to_8), vk::SampleCountFlags::TYPE_1);
        assert_eq!(
            pick_sample_count(4, vk::SampleCountFlags::TYPE_1),
            vk::SampleCountFlags::TYPE_1
        );
        assert_eq!(pick_sample_count(8, up_to_8).as_raw(), 8);
    }

    #[test]
    fn pass_info_reports_one_color_attachment() {
        let info = plan(vk::SampleCountFlags::TYPE_2).pass_info();
        assert_eq!(info.color_attachment_count, 1);
        assert_eq!(info.samples, vk::SampleCountFlags::TYPE_2);
    }
}
