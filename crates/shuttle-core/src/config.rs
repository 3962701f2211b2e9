// SPDX-License-Identifier: CEPL-1.0
//! `shuttle.toml` loading.
//!
//! Every field has a default, so a partial (or absent) file is fine:
//!
//! ```toml
//! [window]
//! width = 1280
//!
//! [render]
//! present_mode = "mailbox"
//! msaa_samples = 8
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("render.msaa_samples must be a power of two in 1..=64, got {0}")]
    InvalidMsaa(u32),
    #[error("window size must be non-zero, got {0}x{1}")]
    ZeroWindow(u32, u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PresentModePref {
    /// Vsynced, never tears, always available.
    #[default]
    Fifo,
    Mailbox,
    Immediate,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "shuttle".to_owned(),
            width: 800,
            height: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    pub clear_color: [f32; 4],
    pub present_mode: PresentModePref,
    /// Requested MSAA sample count; clamped to what the device supports.
    pub msaa_samples: u32,
    /// Bound on the per-slot fence wait. `None` waits forever.
    pub fence_timeout_ms: Option<u64>,
    /// Enable VK_LAYER_KHRONOS_validation + debug messenger.
    pub validation: bool,
    /// Directory holding `main.vert.spv` / `main.frag.spv`. Built-in shaders otherwise.
    pub shader_dir: Option<PathBuf>,
    /// Where to load/save the pipeline cache blob. Not persisted when unset.
    pub pipeline_cache: Option<PathBuf>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 0.0],
            present_mode: PresentModePref::Fifo,
            msaa_samples: 4,
            fence_timeout_ms: None,
            validation: cfg!(debug_assertions),
            shader_dir: None,
            pipeline_cache: None,
        }
    }
}

impl RenderConfig {
    /// Fence timeout in nanoseconds, as Vulkan wants it.
    pub fn fence_timeout_ns(&self) -> u64 {
        self.fence_timeout_ms
            .map(|ms| ms.saturating_mul(1_000_000))
            .unwrap_or(u64::MAX)
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub window: WindowConfig,
    pub render: RenderConfig,
}

impl AppConfig {
    /// Parses only. Call `validate` once CLI overrides have been applied.
    pub fn from_toml_str(s: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&s, path)
    }

    /// Missing file → defaults. Unreadable or unparsable file → warning +
    /// defaults. Values are not validated here, so a bad setting surfaces from
    /// `validate` instead of being swapped for defaults.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(cfg) => {
                info!("config loaded from {}", path.display());
                cfg
            }
            Err(ConfigError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                info!("no config at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                warn!("{e}; using defaults");
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = self.render.msaa_samples;
        if s == 0 || s > 64 || !s.is_power_of_two() {
            return Err(ConfigError::InvalidMsaa(s));
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::ZeroWindow(self.window.width, self.window.height));
        }
        Ok(())
    }
}
