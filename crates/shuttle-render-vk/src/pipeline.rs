// SPDX-License-Identifier: CEPL-1.0
//! Graphics pipeline assembly from one validated configuration value.
//!
//! STRICT: a pipeline is bound to the render pass it was built against.
//! Destroying that render pass means destroying and rebuilding the pipeline.

use anyhow::{anyhow, Result};
use ash::vk;
use std::collections::HashSet;
use std::ffi::CStr;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::RenderError;

#[derive(Clone, Copy, Debug)]
pub struct ShaderStage {
    pub stage: vk::ShaderStageFlags,
    pub module: vk::ShaderModule,
    pub entry: &'static CStr,
}

/// What the pipeline needs to know about the render pass it targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderPassInfo {
    pub color_attachment_count: u32,
    pub samples: vk::SampleCountFlags,
}

#[derive(Debug, Error, PartialEq)]
pub enum PipelineConfigError {
    #[error("expected exactly one {stage:?} stage, found {found}")]
    StageCount {
        stage: vk::ShaderStageFlags,
        found: usize,
    },
    #[error("unsupported shader stage {0:?}")]
    UnsupportedStage(vk::ShaderStageFlags),
    #[error("attribute at location {location} references undeclared binding {binding}")]
    UnknownBinding { location: u32, binding: u32 },
    #[error("vertex attribute location {0} declared twice")]
    DuplicateLocation(u32),
    #[error("vertex binding {0} declared twice")]
    DuplicateBinding(u32),
    #[error("pipeline samples {pipeline:?} != render target samples {target:?}")]
    SampleMismatch {
        pipeline: vk::SampleCountFlags,
        target: vk::SampleCountFlags,
    },
    #[error("render target has {0} color attachments, expected 1")]
    ColorAttachmentCount(u32),
    #[error("line width must be positive, got {0}")]
    LineWidth(f32),
}

#[derive(Clone, Debug)]
pub struct GraphicsPipelineConfig {
    pub stages: Vec<ShaderStage>,
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
    pub topology: vk::PrimitiveTopology,
    pub primitive_restart: bool,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub line_width: f32,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: vk::CompareOp,
    pub samples: vk::SampleCountFlags,
    pub color_write_mask: vk::ColorComponentFlags,
    pub dynamic_states: Vec<vk::DynamicState>,
}

impl Default for GraphicsPipelineConfig {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            bindings: Vec::new(),
            attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            primitive_restart: false,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            line_width: 1.0,
            depth_test: true,
            depth_write: true,
            depth_compare: vk::CompareOp::LESS,
            samples: vk::SampleCountFlags::TYPE_1,
            color_write_mask: vk::ColorComponentFlags::R
                | vk::ColorComponentFlags::G
                | vk::ColorComponentFlags::B
                | vk::ColorComponentFlags::A,
            dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
        }
    }
}

impl GraphicsPipelineConfig {
    pub fn new(
        stages: Vec<ShaderStage>,
        bindings: Vec<vk::VertexInputBindingDescription>,
        attributes: Vec<vk::VertexInputAttributeDescription>,
    ) -> Self {
        Self {
            stages,
            bindings,
            attributes,
            ..Default::default()
        }
    }

    pub fn with_samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    /// Checks the whole value before any Vulkan call.
    pub fn validate(&self, pass: &RenderPassInfo) -> Result<(), PipelineConfigError> {
        for s in &self.stages {
            if s.stage != vk::ShaderStageFlags::VERTEX
                && s.stage != vk::ShaderStageFlags::FRAGMENT
            {
                return Err(PipelineConfigError::UnsupportedStage(s.stage));
            }
        }
        for stage in [vk::ShaderStageFlags::VERTEX, vk::ShaderStageFlags::FRAGMENT] {
            let found = self.stages.iter().filter(|s| s.stage == stage).count();
            if found != 1 {
                return Err(PipelineConfigError::StageCount { stage, found });
            }
        }

        let mut bindings = HashSet::new();
        for b in &self.bindings {
            if !bindings.insert(b.binding) {
                return Err(PipelineConfigError::DuplicateBinding(b.binding));
            }
        }
        let mut locations = HashSet::new();
        for a in &self.attributes {
            if !bindings.contains(&a.binding) {
                return Err(PipelineConfigError::UnknownBinding {
                    location: a.location,
                    binding: a.binding,
                });
            }
            if !locations.insert(a.location) {
                return Err(PipelineConfigError::DuplicateLocation(a.location));
            }
        }

        if self.samples != pass.samples {
            return Err(PipelineConfigError::SampleMismatch {
                pipeline: self.samples,
                target: pass.samples,
            });
        }
        if pass.color_attachment_count != 1 {
            return Err(PipelineConfigError::ColorAttachmentCount(
                pass.color_attachment_count,
            ));
        }
        if self.line_width.is_nan() || self.line_width <= 0.0 {
            return Err(PipelineConfigError::LineWidth(self.line_width));
        }
        Ok(())
    }
}

pub struct PipelineState {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub cache: vk::PipelineCache,
    cache_path: Option<PathBuf>,
}

unsafe fn create_or_load_pipeline_cache(
    device: &ash::Device,
    path: Option<&Path>,
) -> Result<vk::PipelineCache> {
    let data = path.and_then(|p| fs::read(p).ok());
    let (p_initial_data, initial_data_size) = match data {
        Some(ref bytes) => {
            debug!("pipeline cache: seeded with {} bytes", bytes.len());
            (bytes.as_ptr() as *const std::ffi::c_void, bytes.len())
        }
        None => (std::ptr::null(), 0),
    };
    let ci = vk::PipelineCacheCreateInfo {
        s_type: vk::StructureType::PIPELINE_CACHE_CREATE_INFO,
        initial_data_size,
        p_initial_data,
        ..Default::default()
    };
    Ok(device
        .create_pipeline_cache(&ci, None)
        .map_err(RenderError::vk("vkCreatePipelineCache"))?)
}

unsafe fn save_pipeline_cache(device: &ash::Device, cache: vk::PipelineCache, path: &Path) {
    match device.get_pipeline_cache_data(cache) {
        Ok(bytes) => {
            if let Some(parent) = path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            if let Err(e) = fs::write(path, &bytes) {
                warn!("pipeline cache: write {} failed: {e}", path.display());
            }
        }
        Err(e) => {
            // benign; some drivers fail when the cache is empty
            debug!("pipeline cache: no data ({e:?})");
        }
    }
}

impl PipelineState {
    pub unsafe fn build_with_cache(
        device: &ash::Device,
        config: &GraphicsPipelineConfig,
        pass: &RenderPassInfo,
        render_pass: vk::RenderPass,
        set_layout: vk::DescriptorSetLayout,
        cache_path: Option<&Path>,
    ) -> Result<Self> {
        config.validate(pass)?;

        let cache = create_or_load_pipeline_cache(device, cache_path)?;

        let layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            set_layout_count: 1,
            p_set_layouts: &set_layout,
            ..Default::default()
        };
        let layout = match device.create_pipeline_layout(&layout_info, None) {
            Ok(l) => l,
            Err(e) => {
                device.destroy_pipeline_cache(cache, None);
                return Err(RenderError::vk("vkCreatePipelineLayout")(e).into());
            }
        };

        // --- Shader stages ---
        let stages: Vec<vk::PipelineShaderStageCreateInfo> = config
            .stages
            .iter()
            .map(|s| vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: s.stage,
                module: s.module,
                p_name: s.entry.as_ptr(),
                ..Default::default()
            })
            .collect();

        // --- Fixed-function states ---
        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            vertex_binding_description_count: config.bindings.len() as u32,
            p_vertex_binding_descriptions: config.bindings.as_ptr(),
            vertex_attribute_description_count: config.attributes.len() as u32,
            p_vertex_attribute_descriptions: config.attributes.as_ptr(),
            ..Default::default()
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology: config.topology,
            primitive_restart_enable: config.primitive_restart.into(),
            ..Default::default()
        };
        let dynamic_state = vk::PipelineDynamicStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
            dynamic_state_count: config.dynamic_states.len() as u32,
            p_dynamic_states: config.dynamic_states.as_ptr(),
            ..Default::default()
        };
        // Extent is set per frame through dynamic state.
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            p_viewports: std::ptr::null(),
            scissor_count: 1,
            p_scissors: std::ptr::null(),
            ..Default::default()
        };
        let raster = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            polygon_mode: config.polygon_mode,
            cull_mode: config.cull_mode,
            front_face: config.front_face,
            line_width: config.line_width,
            ..Default::default()
        };
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            rasterization_samples: config.samples,
            min_sample_shading: 1.0,
            ..Default::default()
        };
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
            depth_test_enable: config.depth_test.into(),
            depth_write_enable: config.depth_write.into(),
            depth_compare_op: config.depth_compare,
            stencil_test_enable: vk::FALSE,
            max_depth_bounds: 1.0,
            ..Default::default()
        };
        let color_blend_att = vk::PipelineColorBlendAttachmentState {
            color_write_mask: config.color_write_mask,
            blend_enable: vk::FALSE,
            ..Default::default()
        };
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &color_blend_att,
            ..Default::default()
        };

        let pipeline_info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &raster,
            p_multisample_state: &multisample,
            p_depth_stencil_state: &depth_stencil,
            p_color_blend_state: &color_blend,
            p_dynamic_state: &dynamic_state,
            layout,
            render_pass,
            subpass: 0,
            ..Default::default()
        };

        let created =
            device.create_graphics_pipelines(cache, std::slice::from_ref(&pipeline_info), None);
        let pipeline = match created {
            Ok(p) => p[0],
            Err((_, err)) => {
                device.destroy_pipeline_layout(layout, None);
                device.destroy_pipeline_cache(cache, None);
                return Err(anyhow!("create_graphics_pipelines failed: {err:?}"));
            }
        };

        info!(
            "pipeline: samples {:?}, cull {:?}, depth {:?}",
            config.samples, config.cull_mode, config.depth_compare
        );

        Ok(Self {
            pipeline,
            layout,
            cache,
            cache_path: cache_path.map(Path::to_path_buf),
        })
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        if let Some(path) = &self.cache_path {
            save_pipeline_cache(device, self.cache, path);
        }
        device.destroy_pipeline(self.pipeline, None);
        device.destroy_pipeline_layout(self.layout, None);
        device.destroy_pipeline_cache(self.cache, None);
    }
}
