// SPDX-License-Identifier: CEPL-1.0
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ash::vk;
use tracing::{debug, info, warn};

/// Cache data is only valid for one device and driver build.
pub fn cache_file_name(props: &vk::PhysicalDeviceProperties) -> String {
    let mut uuid = String::with_capacity(props.pipeline_cache_uuid.len() * 2);
    for b in props.pipeline_cache_uuid {
        let _ = write!(uuid, "{b:02x}");
    }
    format!(
        "vk_pipeline_cache_{:04x}_{:04x}_{:08x}_{}.bin",
        props.vendor_id, props.device_id, props.driver_version, uuid
    )
}

unsafe fn create(device: &ash::Device, seed: &[u8]) -> Result<vk::PipelineCache> {
    let ci = vk::PipelineCacheCreateInfo {
        s_type: vk::StructureType::PIPELINE_CACHE_CREATE_INFO,
        initial_data_size: seed.len(),
        p_initial_data: if seed.is_empty() {
            std::ptr::null()
        } else {
            seed.as_ptr().cast()
        },
        ..Default::default()
    };
    Ok(device
        .create_pipeline_cache(&ci, None)
        .context("create_pipeline_cache")?)
}

/// Pipeline cache shared by every pipeline build, persisted on drop when a
/// file is configured.
pub struct PipelineCache {
    device: ash::Device,
    pub handle: vk::PipelineCache,
    path: Option<PathBuf>,
}

impl PipelineCache {
    /// # Safety
    /// Must be dropped before `device` is destroyed.
    pub unsafe fn open(
        device: &ash::Device,
        props: &vk::PhysicalDeviceProperties,
        dir: Option<&Path>,
    ) -> Result<Self> {
        let path = dir.map(|d| d.join(cache_file_name(props)));
        let seed = path
            .as_deref()
            .and_then(|p| fs::read(p).ok())
            .unwrap_or_default();

        let handle = match create(device, &seed) {
            Ok(h) => h,
            Err(e) if !seed.is_empty() => {
                warn!("discarding unusable pipeline cache: {e:#}");
                create(device, &[])?
            }
            Err(e) => return Err(e),
        };
        if let Some(p) = &path {
            info!(
                "pipeline cache {} ({} bytes loaded)",
                p.display(),
                seed.len()
            );
        }
        Ok(PipelineCache {
            device: device.clone(),
            handle,
            path,
        })
    }

    unsafe fn save(&self, path: &Path) -> Result<()> {
        let bytes = self
            .device
            .get_pipeline_cache_data(self.handle)
            .context("get_pipeline_cache_data")?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(path, &bytes).with_context(|| format!("write {}", path.display()))?;
        debug!("saved {} bytes of pipeline cache", bytes.len());
        Ok(())
    }
}

impl Drop for PipelineCache {
    fn drop(&mut self) {
        unsafe {
            if let Some(path) = &self.path {
                if let Err(e) = self.save(path) {
                    warn!("pipeline cache not saved: {e:#}");
                }
            }
            self.device.destroy_pipeline_cache(self.handle, None);
        }
    }
}
