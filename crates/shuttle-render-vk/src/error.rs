// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

/// Construction-time failures the renderer cannot recover from.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to load the Vulkan loader: {0}")]
    Loader(String),
    #[error("no physical device offers graphics + present for this surface with {0} enabled")]
    NoSuitableDevice(String),
    #[error("surface reports no usable swapchain configuration ({0})")]
    NoSwapchainConfig(&'static str),
    #[error("surface extent is 0x0")]
    ZeroExtent,
    #[error("no memory type matches bits {type_bits:#x} with {flags:?}")]
    NoMemoryType {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },
    #[error("failed to read shader {path}: {source}")]
    ShaderRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{call} failed: {result:?}")]
    Vulkan {
        call: &'static str,
        result: vk::Result,
    },
}

impl RenderError {
    pub(crate) fn vk(call: &'static str) -> impl FnOnce(vk::Result) -> RenderError {
        move |result| RenderError::Vulkan { call, result }
    }
}
