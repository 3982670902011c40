// SPDX-License-Identifier: CEPL-1.0
use std::io::Cursor;
use std::path::Path;
use std::{borrow::Cow, fs};

use anyhow::{Context, Result};
use ash::util::read_spv;
use ash::vk;
use tracing::info;

pub const VERT_FILE: &str = "tri.vert.spv";
pub const FRAG_FILE: &str = "tri.frag.spv";

// Compiled by build.rs.
const VERT_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/tri.vert.spv"));
const FRAG_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/tri.frag.spv"));

/// SPIR-V words for `file`, from `dir` when given, else the built-in copy.
pub fn load_words(dir: Option<&Path>, file: &str) -> Result<Vec<u32>> {
    let bytes: Cow<'static, [u8]> = match dir {
        Some(dir) => {
            let path = dir.join(file);
            info!("loading shader {}", path.display());
            Cow::Owned(fs::read(&path).with_context(|| format!("read {}", path.display()))?)
        }
        None => Cow::Borrowed(match file {
            VERT_FILE => VERT_SPV,
            FRAG_FILE => FRAG_SPV,
            other => anyhow::bail!("no built-in shader named {other}"),
        }),
    };
    read_spv(&mut Cursor::new(&bytes[..])).with_context(|| format!("parse SPIR-V {file}"))
}

unsafe fn create_module(device: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule> {
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: code.len() * 4,
        ..Default::default()
    };
    Ok(device
        .create_shader_module(&ci, None)
        .context("create_shader_module")?)
}

/// Vertex and fragment modules, kept for the renderer's lifetime so every
/// pipeline rebuild reuses them.
pub struct ShaderModules {
    device: ash::Device,
    pub vert: vk::ShaderModule,
    pub frag: vk::ShaderModule,
}

impl ShaderModules {
    /// # Safety
    /// Must be dropped before `device` is destroyed.
    pub unsafe fn load(device: &ash::Device, dir: Option<&Path>) -> Result<Self> {
        let vert_code = load_words(dir, VERT_FILE)?;
        let frag_code = load_words(dir, FRAG_FILE)?;

        let mut modules = ShaderModules {
            device: device.clone(),
            vert: vk::ShaderModule::null(),
            frag: vk::ShaderModule::null(),
        };
        modules.vert = create_module(device, &vert_code)?;
        modules.frag = create_module(device, &frag_code)?;
        Ok(modules)
    }
}

impl Drop for ShaderModules {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.vert, None);
            self.device.destroy_shader_module(self.frag, None);
        }
    }
}
