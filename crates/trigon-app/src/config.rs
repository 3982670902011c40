// SPDX-License-Identifier: CEPL-1.0
use std::{fs, io, path::Path, path::PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{error, info};
use trigon_platform::WindowSpec;
use trigon_render_vk::config::VALIDATION_LAYER;
use trigon_render_vk::{PresentMode, PresenterConfig, SurfaceFormat};

pub const DEFAULT_CONFIG_PATH: &str = "trigon.toml";

#[derive(Debug, Deserialize, Default, PartialEq)]
pub struct AppCfg {
    #[serde(default)]
    pub window: WindowCfg,
    #[serde(default)]
    pub render: RenderCfg,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowCfg {
    fn default() -> Self {
        let spec = WindowSpec::default();
        WindowCfg {
            title: spec.title,
            width: spec.width,
            height: spec.height,
            resizable: spec.resizable,
        }
    }
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    /// Preference order, e.g. `["bgra8_srgb", "bgra8_unorm"]`.
    pub surface_formats: Vec<String>,
    /// Preference order, e.g. `["mailbox", "fifo"]`.
    pub present_modes: Vec<String>,
    pub frames_in_flight: usize,
    /// Unset means on in debug builds only.
    pub validation: Option<bool>,
    pub validation_layers: Vec<String>,
    pub device_extensions: Vec<String>,
    pub shader_dir: Option<PathBuf>,
    pub pipeline_cache_dir: Option<PathBuf>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        let base = PresenterConfig::default();
        RenderCfg {
            surface_formats: base.surface_formats.iter().map(|f| f.to_string()).collect(),
            present_modes: base.present_modes.iter().map(|m| m.to_string()).collect(),
            frames_in_flight: base.frames_in_flight,
            validation: None,
            validation_layers: vec![VALIDATION_LAYER.to_owned()],
            device_extensions: base.device_extensions,
            shader_dir: None,
            pipeline_cache_dir: None,
        }
    }
}

/// Command-line values that win over the file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub frames_in_flight: Option<usize>,
    pub present_mode: Option<PresentMode>,
    pub no_validation: bool,
}

pub fn parse(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str(text)
}

/// A missing file means defaults. A malformed one is reported and also falls
/// back to defaults.
pub fn load(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(text) => match parse(&text) {
            Ok(cfg) => {
                info!("config loaded from {}", path.display());
                cfg
            }
            Err(e) => {
                error!("config {} is malformed, using defaults: {e}", path.display());
                AppCfg::default()
            }
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("no config at {}, using defaults", path.display());
            AppCfg::default()
        }
        Err(e) => {
            error!("config {} unreadable, using defaults: {e}", path.display());
            AppCfg::default()
        }
    }
}

impl AppCfg {
    pub fn window_spec(&self) -> WindowSpec {
        WindowSpec {
            title: self.window.title.clone(),
            width: self.window.width,
            height: self.window.height,
            resizable: self.window.resizable,
        }
    }

    pub fn presenter_config(&self, overrides: &Overrides) -> Result<PresenterConfig> {
        let r = &self.render;
        let surface_formats = r
            .surface_formats
            .iter()
            .map(|s| s.parse::<SurfaceFormat>())
            .collect::<Result<Vec<_>, _>>()
            .context("render.surface_formats")?;
        let mut present_modes = r
            .present_modes
            .iter()
            .map(|s| s.parse::<PresentMode>())
            .collect::<Result<Vec<_>, _>>()
            .context("render.present_modes")?;
        if let Some(mode) = overrides.present_mode {
            present_modes = vec![mode];
        }

        let validation =
            !overrides.no_validation && r.validation.unwrap_or(cfg!(debug_assertions));

        let cfg = PresenterConfig {
            app_name: self.window.title.clone(),
            device_extensions: r.device_extensions.clone(),
            validation_layers: if validation {
                r.validation_layers.clone()
            } else {
                Vec::new()
            },
            surface_formats,
            present_modes,
            frames_in_flight: overrides.frames_in_flight.unwrap_or(r.frames_in_flight),
            shader_dir: r.shader_dir.clone(),
            pipeline_cache_dir: r.pipeline_cache_dir.clone(),
        };
        cfg.validate()?;
        Ok(cfg)
    }
}
