// SPDX-License-Identifier: CEPL-1.0
//! SPIR-V loading. Every shader is load-bearing: a missing or malformed file
//! is a startup failure.

use anyhow::{Context, Result};
use ash::util::read_spv;
use ash::vk;
use std::ffi::CStr;
use std::fs::File;
use std::io::Cursor;
use std::path::Path;
use tracing::info;

use crate::error::RenderError;
use crate::pipeline::ShaderStage;

const ENTRY_POINT: &CStr = c"main";

static BUILTIN_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/main.vert.spv"));
static BUILTIN_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/main.frag.spv"));

pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Reads a compiled shader as 32-bit words.
pub fn read_spirv(path: &Path) -> Result<Vec<u32>, RenderError> {
    let mut file = File::open(path).map_err(|source| RenderError::ShaderRead {
        path: path.to_path_buf(),
        source,
    })?;
    read_spv(&mut file).map_err(|source| RenderError::ShaderRead {
        path: path.to_path_buf(),
        source,
    })
}

fn builtin_words(bytes: &[u8]) -> Result<Vec<u32>> {
    Ok(read_spv(&mut Cursor::new(bytes))?)
}

pub struct ShaderModule {
    pub stage: vk::ShaderStageFlags,
    pub module: vk::ShaderModule,
}

impl ShaderModule {
    unsafe fn create(
        device: &ash::Device,
        name: &'static str,
        stage: vk::ShaderStageFlags,
        code: &[u32],
    ) -> Result<Self> {
        let ci = vk::ShaderModuleCreateInfo {
            s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
            code_size: std::mem::size_of_val(code),
            p_code: code.as_ptr(),
            ..Default::default()
        };
        let module = device
            .create_shader_module(&ci, None)
            .map_err(RenderError::vk("vkCreateShaderModule"))
            .with_context(|| format!("shader module {name}"))?;
        Ok(Self { stage, module })
    }

    pub fn stage_info(&self) -> ShaderStage {
        ShaderStage {
            stage: self.stage,
            module: self.module,
            entry: ENTRY_POINT,
        }
    }
}

/// The vertex + fragment pair the default pipeline is built from.
/// Lives for the renderer's lifetime; pipelines are rebuilt from it on recreate.
pub struct ShaderSet {
    pub vertex: ShaderModule,
    pub fragment: ShaderModule,
}

impl ShaderSet {
    pub unsafe fn load(device: &ash::Device, shader_dir: Option<&Path>) -> Result<Self> {
        let (vs, fs) = match shader_dir {
            Some(dir) => {
                info!("loading shaders from {}", dir.display());
                (
                    read_spirv(&dir.join("main.vert.spv"))?,
                    read_spirv(&dir.join("main.frag.spv"))?,
                )
            }
            None => (builtin_words(BUILTIN_VERT)?, builtin_words(BUILTIN_FRAG)?),
        };

        let vertex = ShaderModule::create(device, "mainVert", vk::ShaderStageFlags::VERTEX, &vs)?;
        let fragment =
            match ShaderModule::create(device, "mainFrag", vk::ShaderStageFlags::FRAGMENT, &fs) {
                Ok(m) => m,
                Err(e) => {
                    device.destroy_shader_module(vertex.module, None);
                    return Err(e);
                }
            };
        Ok(Self { vertex, fragment })
    }

    pub fn stages(&self) -> Vec<ShaderStage> {
        vec![self.vertex.stage_info(), self.fragment.stage_info()]
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_shader_module(self.vertex.module, None);
        device.destroy_shader_module(self.fragment.module, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("shuttle-{}-{name}", std::process::id()));
        let mut f = File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn builtin_shaders_are_spirv() {
        for bytes in [BUILTIN_VERT, BUILTIN_FRAG] {
            let words = builtin_words(bytes).unwrap();
            assert_eq!(words[0], SPIRV_MAGIC);
        }
    }

    #[test]
    fn reads_words_from_file() {
        let path = temp_file("ok.spv", &[0x03, 0x02, 0x23, 0x07, 1, 0, 0, 0]);
        let words = read_spirv(&path).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 1]);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn truncated_file_is_rejected() {
        let path = temp_file("bad.spv", &[0x03, 0x02, 0x23]);
        assert!(matches!(
            read_spirv(&path),
            Err(RenderError::ShaderRead { .. })
        ));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn missing_file_names_path() {
        let err = read_spirv(Path::new("/nope/main.vert.spv")).unwrap_err();
        assert!(err.to_string().contains("/nope/main.vert.spv"));
    }
}
