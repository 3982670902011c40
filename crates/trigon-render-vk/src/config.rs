// SPDX-License-Identifier: CEPL-1.0
use std::{ffi::CString, fmt, path::PathBuf, str::FromStr};

use ash::vk;
use thiserror::Error;

pub const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

/// Used when no requested format is supported.
pub const DEFAULT_SURFACE_FORMAT: SurfaceFormat = SurfaceFormat::Bgra8Unorm;
/// FIFO is the one mode every implementation must support.
pub const DEFAULT_PRESENT_MODE: PresentMode = PresentMode::Fifo;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentMode {
    Immediate,
    Mailbox,
    Fifo,
    FifoRelaxed,
}

impl PresentMode {
    const ALL: [PresentMode; 4] = [
        PresentMode::Immediate,
        PresentMode::Mailbox,
        PresentMode::Fifo,
        PresentMode::FifoRelaxed,
    ];

    pub fn to_vk(self) -> vk::PresentModeKHR {
        match self {
            PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
            PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
            PresentMode::Fifo => vk::PresentModeKHR::FIFO,
            PresentMode::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PresentMode::Immediate => "immediate",
            PresentMode::Mailbox => "mailbox",
            PresentMode::Fifo => "fifo",
            PresentMode::FifoRelaxed => "fifo_relaxed",
        }
    }
}

/// Eight-bit color formats in the sRGB nonlinear color space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceFormat {
    Bgra8Unorm,
    Bgra8Srgb,
    Rgba8Unorm,
    Rgba8Srgb,
}

impl SurfaceFormat {
    const ALL: [SurfaceFormat; 4] = [
        SurfaceFormat::Bgra8Unorm,
        SurfaceFormat::Bgra8Srgb,
        SurfaceFormat::Rgba8Unorm,
        SurfaceFormat::Rgba8Srgb,
    ];

    pub fn format(self) -> vk::Format {
        match self {
            SurfaceFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
            SurfaceFormat::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
            SurfaceFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
            SurfaceFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        }
    }

    pub fn color_space(self) -> vk::ColorSpaceKHR {
        vk::ColorSpaceKHR::SRGB_NONLINEAR
    }

    pub fn name(self) -> &'static str {
        match self {
            SurfaceFormat::Bgra8Unorm => "bgra8_unorm",
            SurfaceFormat::Bgra8Srgb => "bgra8_srgb",
            SurfaceFormat::Rgba8Unorm => "rgba8_unorm",
            SurfaceFormat::Rgba8Srgb => "rgba8_srgb",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown {what} '{given}', expected one of: {expected}")]
pub struct UnknownName {
    what: &'static str,
    given: String,
    expected: String,
}

fn parse_named<T: Copy>(
    what: &'static str,
    s: &str,
    all: &[T],
    name: impl Fn(T) -> &'static str,
) -> Result<T, UnknownName> {
    let wanted = s.trim().replace('-', "_");
    all.iter()
        .copied()
        .find(|v| name(*v).eq_ignore_ascii_case(&wanted))
        .ok_or_else(|| UnknownName {
            what,
            given: s.to_owned(),
            expected: all.iter().map(|v| name(*v)).collect::<Vec<_>>().join(", "),
        })
}

impl FromStr for PresentMode {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_named("present mode", s, &PresentMode::ALL, PresentMode::name)
    }
}

impl FromStr for SurfaceFormat {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_named("surface format", s, &SurfaceFormat::ALL, SurfaceFormat::name)
    }
}

impl fmt::Display for PresentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for SurfaceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("frames in flight must be at least 1")]
    NoFramesInFlight,

    #[error("empty {what} name")]
    EmptyName { what: &'static str },

    #[error("{what} name {name:?} contains a NUL byte")]
    NulInName { what: &'static str, name: String },
}

/// Everything the presenter is configured with, fixed for its lifetime.
#[derive(Clone, Debug)]
pub struct PresenterConfig {
    pub app_name: String,
    /// Required on top of `VK_KHR_swapchain`, which is always required.
    pub device_extensions: Vec<String>,
    /// A debug messenger is installed whenever this is non-empty.
    pub validation_layers: Vec<String>,
    /// Highest priority first.
    pub surface_formats: Vec<SurfaceFormat>,
    /// Highest priority first.
    pub present_modes: Vec<PresentMode>,
    pub frames_in_flight: usize,
    /// Directory with `tri.vert.spv` / `tri.frag.spv` overriding the built-in shaders.
    pub shader_dir: Option<PathBuf>,
    /// Directory the pipeline cache is loaded from and saved to.
    pub pipeline_cache_dir: Option<PathBuf>,
}

impl Default for PresenterConfig {
    fn default() -> Self {
        PresenterConfig {
            app_name: "trigon".to_owned(),
            device_extensions: Vec::new(),
            validation_layers: if cfg!(debug_assertions) {
                vec![VALIDATION_LAYER.to_owned()]
            } else {
                Vec::new()
            },
            surface_formats: vec![SurfaceFormat::Bgra8Srgb, SurfaceFormat::Bgra8Unorm],
            present_modes: vec![PresentMode::Mailbox, PresentMode::Fifo],
            frames_in_flight: 2,
            shader_dir: None,
            pipeline_cache_dir: None,
        }
    }
}

impl PresenterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frames_in_flight == 0 {
            return Err(ConfigError::NoFramesInFlight);
        }
        c_names("application", std::slice::from_ref(&self.app_name))?;
        c_names("device extension", &self.device_extensions)?;
        c_names("validation layer", &self.validation_layers)?;
        Ok(())
    }

    pub fn validation_enabled(&self) -> bool {
        !self.validation_layers.is_empty()
    }
}

/// Converts names for the C API, rejecting empty ones.
pub fn c_names(what: &'static str, names: &[String]) -> Result<Vec<CString>, ConfigError> {
    names
        .iter()
        .map(|n| {
            if n.is_empty() {
                return Err(ConfigError::EmptyName { what });
            }
            CString::new(n.as_str()).map_err(|_| ConfigError::NulInName {
                what,
                name: n.clone(),
            })
        })
        .collect()
}
