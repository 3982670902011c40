// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, CString};

use anyhow::{bail, Context, Result};
use ash::khr::swapchain;
use ash::vk;
use tracing::{debug, info};

use crate::caps::{self, SurfaceSupport};
use crate::config::{c_names, PresenterConfig};
use crate::instance::InstanceBundle;

/// One queue family as the device reports it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyRef {
    pub index: u32,
    pub queue_count: u32,
    pub flags: vk::QueueFlags,
    /// Can present to the target surface.
    pub present: bool,
}

/// Resolved graphics and present families; they may be the same family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    pub fn unique_indices(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Prefers a single family that does both; otherwise the first of each.
pub fn resolve_queue_families(families: &[QueueFamilyRef]) -> Option<QueueFamilies> {
    let usable = || families.iter().filter(|f| f.queue_count > 0);
    let is_graphics = |f: &&QueueFamilyRef| f.flags.contains(vk::QueueFlags::GRAPHICS);

    if let Some(both) = usable().find(|f| is_graphics(f) && f.present) {
        return Some(QueueFamilies {
            graphics: both.index,
            present: both.index,
        });
    }
    let graphics = usable().find(is_graphics)?;
    let present = usable().find(|f| f.present)?;
    Some(QueueFamilies {
        graphics: graphics.index,
        present: present.index,
    })
}

/// Higher is better.
pub fn device_type_rank(ty: vk::PhysicalDeviceType) -> u32 {
    match ty {
        vk::PhysicalDeviceType::DISCRETE_GPU => 3,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
        _ => 0,
    }
}

unsafe fn queue_families(
    inst: &InstanceBundle,
    phys: vk::PhysicalDevice,
) -> Result<Vec<QueueFamilyRef>> {
    let props = inst
        .instance
        .get_physical_device_queue_family_properties(phys);
    props
        .iter()
        .enumerate()
        .map(|(i, q)| {
            let index = i as u32;
            let present = inst
                .surface_loader
                .get_physical_device_surface_support(phys, index, inst.surface)
                .context("get_physical_device_surface_support")?;
            Ok(QueueFamilyRef {
                index,
                queue_count: q.queue_count,
                flags: q.queue_flags,
                present,
            })
        })
        .collect()
}

struct Candidate {
    phys: vk::PhysicalDevice,
    name: String,
    rank: u32,
    families: QueueFamilies,
}

/// `Ok(Err(reason))` when the device is unsuitable.
unsafe fn judge(
    inst: &InstanceBundle,
    phys: vk::PhysicalDevice,
    required: &[CString],
) -> Result<std::result::Result<Candidate, String>> {
    let props = inst.instance.get_physical_device_properties(phys);
    let name = props
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "<unnamed>".to_owned());

    if let Err(e) = caps::require(
        "device extensions",
        required,
        &caps::device_extensions(&inst.instance, phys)?,
    ) {
        return Ok(Err(format!("{name}: {e}")));
    }
    let Some(families) = resolve_queue_families(&queue_families(inst, phys)?) else {
        return Ok(Err(format!("{name}: no graphics or present queue family")));
    };
    let support = SurfaceSupport::query(&inst.surface_loader, phys, inst.surface)
        .context("query surface support")?;
    if !support.is_adequate() {
        return Ok(Err(format!("{name}: no surface formats or present modes")));
    }

    Ok(Ok(Candidate {
        phys,
        rank: device_type_rank(props.device_type),
        name,
        families,
    }))
}

/// The chosen physical device, its logical device and its queues.
pub struct Gpu {
    pub phys: vk::PhysicalDevice,
    pub name: String,
    pub families: QueueFamilies,
    pub device: ash::Device,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
}

impl Gpu {
    /// # Safety
    /// The returned device must be dropped before `inst`.
    pub unsafe fn select(inst: &InstanceBundle, cfg: &PresenterConfig) -> Result<Self> {
        let mut required = vec![swapchain::NAME.to_owned()];
        required.extend(c_names("device extension", &cfg.device_extensions)?);

        let mut best: Option<Candidate> = None;
        let mut rejected = Vec::new();
        for phys in inst
            .instance
            .enumerate_physical_devices()
            .context("enumerate_physical_devices")?
        {
            match judge(inst, phys, &required)? {
                Ok(c) => {
                    debug!("candidate GPU {} (rank {})", c.name, c.rank);
                    if best.as_ref().map_or(true, |b| c.rank > b.rank) {
                        best = Some(c);
                    }
                }
                Err(reason) => {
                    debug!("rejected GPU {reason}");
                    rejected.push(reason);
                }
            }
        }
        let Some(chosen) = best else {
            if rejected.is_empty() {
                bail!("no Vulkan physical devices found");
            }
            bail!("no suitable GPU: {}", rejected.join("; "));
        };

        let device = create_device(inst, &chosen, &required)?;
        let graphics_queue = device.get_device_queue(chosen.families.graphics, 0);
        let present_queue = device.get_device_queue(chosen.families.present, 0);

        info!(
            "using GPU {} (graphics family {}, present family {})",
            chosen.name, chosen.families.graphics, chosen.families.present
        );

        Ok(Gpu {
            phys: chosen.phys,
            name: chosen.name,
            families: chosen.families,
            device,
            graphics_queue,
            present_queue,
        })
    }
}

unsafe fn create_device(
    inst: &InstanceBundle,
    chosen: &Candidate,
    extensions: &[CString],
) -> Result<ash::Device> {
    let priorities = [1.0_f32];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = chosen
        .families
        .unique_indices()
        .into_iter()
        .map(|family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    let ext_ptrs: Vec<*const c_char> = extensions.iter().map(|e| e.as_ptr()).collect();
    let features = vk::PhysicalDeviceFeatures::default();

    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        enabled_extension_count: ext_ptrs.len() as u32,
        pp_enabled_extension_names: ext_ptrs.as_ptr(),
        p_enabled_features: &features,
        ..Default::default()
    };

    Ok(inst
        .instance
        .create_device(chosen.phys, &dinfo, None)
        .context("create_device")?)
}

impl Drop for Gpu {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(index: u32, flags: vk::QueueFlags, present: bool) -> QueueFamilyRef {
        QueueFamilyRef {
            index,
            queue_count: 1,
            flags,
            present,
        }
    }

    #[test]
    fn test_prefers_family_doing_both() {
        let families = [
            family(0, vk::QueueFlags::GRAPHICS, false),
            family(1, vk::QueueFlags::COMPUTE, true),
            family(2, vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, true),
        ];
        let got = resolve_queue_families(&families).unwrap();
        assert_eq!(got, QueueFamilies { graphics: 2, present: 2 });
        assert!(got.is_shared());
        assert_eq!(got.unique_indices(), vec![2]);
    }

    #[test]
    fn test_distinct_families_when_none_does_both() {
        let families = [
            family(0, vk::QueueFlags::TRANSFER, false),
            family(1, vk::QueueFlags::GRAPHICS, false),
            family(2, vk::QueueFlags::COMPUTE, true),
        ];
        let got = resolve_queue_families(&families).unwrap();
        assert_eq!(got, QueueFamilies { graphics: 1, present: 2 });
        assert_eq!(got.unique_indices(), vec![1, 2]);
    }

    #[test]
    fn test_unresolved_without_graphics_or_present() {
        let no_present = [family(0, vk::QueueFlags::GRAPHICS, false)];
        assert_eq!(resolve_queue_families(&no_present), None);

        let no_graphics = [family(0, vk::QueueFlags::COMPUTE, true)];
        assert_eq!(resolve_queue_families(&no_graphics), None);

        let empty = [QueueFamilyRef {
            queue_count: 0,
            ..family(0, vk::QueueFlags::GRAPHICS, true)
        }];
        assert_eq!(resolve_queue_families(&empty), None);
    }

    #[test]
    fn test_discrete_outranks_integrated_outranks_cpu() {
        let discrete = device_type_rank(vk::PhysicalDeviceType::DISCRETE_GPU);
        let integrated = device_type_rank(vk::PhysicalDeviceType::INTEGRATED_GPU);
        let virt = device_type_rank(vk::PhysicalDeviceType::VIRTUAL_GPU);
        let cpu = device_type_rank(vk::PhysicalDeviceType::CPU);
        assert!(discrete > integrated && integrated > virt && virt > cpu);
        assert_eq!(device_type_rank(vk::PhysicalDeviceType::OTHER), cpu);
    }
}
