// SPDX-License-Identifier: CEPL-1.0
//! Read-only capability queries.

use std::ffi::{CStr, CString};

use anyhow::{Context, Result};
use ash::{khr::surface, prelude::VkResult, vk, Entry};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("missing {what}: {}", .names.join(", "))]
pub struct MissingCapabilities {
    pub what: &'static str,
    pub names: Vec<String>,
}

/// Names from `required` that `available` lacks, in request order.
pub fn missing<'a>(required: &'a [CString], available: &[CString]) -> Vec<&'a CStr> {
    required
        .iter()
        .filter(|r| !available.contains(r))
        .map(CString::as_c_str)
        .collect()
}

pub fn require(
    what: &'static str,
    required: &[CString],
    available: &[CString],
) -> Result<(), MissingCapabilities> {
    let absent = missing(required, available);
    if absent.is_empty() {
        return Ok(());
    }
    Err(MissingCapabilities {
        what,
        names: absent
            .iter()
            .map(|n| n.to_string_lossy().into_owned())
            .collect(),
    })
}

/// # Safety
/// `entry` must hold a loaded Vulkan library.
pub unsafe fn instance_extensions(entry: &Entry) -> Result<Vec<CString>> {
    let props = entry
        .enumerate_instance_extension_properties(None)
        .context("enumerate_instance_extension_properties")?;
    Ok(props
        .iter()
        .filter_map(|p| p.extension_name_as_c_str().ok())
        .map(CStr::to_owned)
        .collect())
}

/// # Safety
/// `entry` must hold a loaded Vulkan library.
pub unsafe fn instance_layers(entry: &Entry) -> Result<Vec<CString>> {
    let props = entry
        .enumerate_instance_layer_properties()
        .context("enumerate_instance_layer_properties")?;
    Ok(props
        .iter()
        .filter_map(|p| p.layer_name_as_c_str().ok())
        .map(CStr::to_owned)
        .collect())
}

/// # Safety
/// `phys` must come from `instance`.
pub unsafe fn device_extensions(
    instance: &ash::Instance,
    phys: vk::PhysicalDevice,
) -> Result<Vec<CString>> {
    let props = instance
        .enumerate_device_extension_properties(phys)
        .context("enumerate_device_extension_properties")?;
    Ok(props
        .iter()
        .filter_map(|p| p.extension_name_as_c_str().ok())
        .map(CStr::to_owned)
        .collect())
}

/// Snapshot of what a surface supports on one physical device.
#[derive(Clone, Debug)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    /// # Safety
    /// `phys` and `surface` must come from the instance behind `loader`.
    pub unsafe fn query(
        loader: &surface::Instance,
        phys: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VkResult<Self> {
        Ok(SurfaceSupport {
            capabilities: loader.get_physical_device_surface_capabilities(phys, surface)?,
            formats: loader.get_physical_device_surface_formats(phys, surface)?,
            present_modes: loader.get_physical_device_surface_present_modes(phys, surface)?,
        })
    }

    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}
