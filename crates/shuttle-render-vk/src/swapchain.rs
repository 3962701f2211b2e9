// SPDX-License-Identifier: CEPL-1.0
//! Presentable image chain. Never mutated in place: a resize destroys the
//! whole state and builds a fresh one.

use anyhow::{Context, Result};
use ash::vk;
use shuttle_core::PresentModePref;
use tracing::info;

use crate::bootstrap::{GpuContext, QueueFamilies};
use crate::error::RenderError;
use crate::memory::create_image_view;

/// Prefer sRGB BGRA, then sRGB RGBA, else whatever the driver listed first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    let srgb = |fmt: vk::Format| {
        formats
            .iter()
            .copied()
            .find(|f| f.format == fmt && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
    };
    srgb(vk::Format::B8G8R8A8_SRGB)
        .or_else(|| srgb(vk::Format::R8G8B8A8_SRGB))
        .or_else(|| formats.first().copied())
}

/// FIFO is always available; it stands in for any preference the surface
/// can't honor.
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    pref: PresentModePref,
) -> vk::PresentModeKHR {
    let wanted: &[vk::PresentModeKHR] = match pref {
        PresentModePref::Fifo => &[vk::PresentModeKHR::FIFO],
        PresentModePref::Mailbox => &[vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO],
        PresentModePref::Immediate => &[
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::FIFO,
        ],
    };
    wanted
        .iter()
        .copied()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// `current_extent == u32::MAX` means the surface lets the swapchain decide.
pub fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by max (0 == "no max").
pub fn image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        want
    } else {
        want.min(caps.max_image_count)
    }
}

pub fn sharing_mode(families: QueueFamilies) -> (vk::SharingMode, Vec<u32>) {
    if families.is_shared() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (vk::SharingMode::CONCURRENT, families.unique())
    }
}

/// Everything decided before the create call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainPlan {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub min_image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainPlan {
    pub fn new(
        caps: &vk::SurfaceCapabilitiesKHR,
        formats: &[vk::SurfaceFormatKHR],
        modes: &[vk::PresentModeKHR],
        want: vk::Extent2D,
        pref: PresentModePref,
    ) -> Result<Self, RenderError> {
        let format = choose_surface_format(formats)
            .ok_or(RenderError::NoSwapchainConfig("no surface formats"))?;
        if modes.is_empty() {
            return Err(RenderError::NoSwapchainConfig("no present modes"));
        }
        let extent = extent_from_caps(caps, want);
        if extent.width == 0 || extent.height == 0 {
            return Err(RenderError::ZeroExtent);
        }
        // Prefer IDENTITY if supported, otherwise use current to avoid extra blits.
        let pre_transform = if caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };
        Ok(Self {
            format,
            present_mode: choose_present_mode(modes, pref),
            extent,
            min_image_count: image_count(caps),
            pre_transform,
        })
    }
}

pub struct SwapchainState {
    pub swapchain: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    /// Owned by the chain.
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
}

impl SwapchainState {
    pub unsafe fn create(
        ctx: &GpuContext,
        width: u32,
        height: u32,
        pref: PresentModePref,
    ) -> Result<Self> {
        let phys = ctx.phys();
        let caps = ctx.surface_capabilities()?;
        let formats = ctx
            .surface_loader
            .get_physical_device_surface_formats(phys, ctx.surface)
            .map_err(RenderError::vk("vkGetPhysicalDeviceSurfaceFormatsKHR"))?;
        let modes = ctx
            .surface_loader
            .get_physical_device_surface_present_modes(phys, ctx.surface)
            .map_err(RenderError::vk("vkGetPhysicalDeviceSurfacePresentModesKHR"))?;

        let plan = SwapchainPlan::new(&caps, &formats, &modes, vk::Extent2D { width, height }, pref)?;
        let (image_sharing_mode, family_indices) = sharing_mode(ctx.selection.families);

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: ctx.surface,
            min_image_count: plan.min_image_count,
            image_format: plan.format.format,
            image_color_space: plan.format.color_space,
            image_extent: plan.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode,
            queue_family_index_count: family_indices.len() as u32,
            p_queue_family_indices: family_indices.as_ptr(),
            pre_transform: plan.pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: plan.present_mode,
            clipped: vk::TRUE,
            old_swapchain: vk::SwapchainKHR::null(),
            ..Default::default()
        };

        let swapchain = ctx
            .swapchain_loader
            .create_swapchain(&swap_info, None)
            .map_err(RenderError::vk("vkCreateSwapchainKHR"))?;
        let images = ctx
            .swapchain_loader
            .get_swapchain_images(swapchain)
            .map_err(RenderError::vk("vkGetSwapchainImagesKHR"))?;

        let mut views = Vec::with_capacity(images.len());
        for &img in &images {
            views.push(
                create_image_view(&ctx.device, img, plan.format.format, vk::ImageAspectFlags::COLOR)
                    .context("swapchain image view")?,
            );
        }

        info!(
            "swapchain: {:?} / {:?}, present_mode {:?}, extent {}x{}, images {} (min {})",
            plan.format.format,
            plan.format.color_space,
            plan.present_mode,
            plan.extent.width,
            plan.extent.height,
            images.len(),
            caps.min_image_count
        );

        Ok(Self {
            swapchain,
            format: plan.format.format,
            extent: plan.extent,
            images,
            views,
        })
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Views first, then the chain (which owns the images).
    pub unsafe fn destroy(&mut self, ctx: &GpuContext) {
        for v in self.views.drain(..) {
            ctx.device.destroy_image_view(v, None);
        }
        self.images.clear();
        ctx.swapchain_loader.destroy_swapchain(self.swapchain, None);
        self.swapchain = vk::SwapchainKHR::null();
    }
}
