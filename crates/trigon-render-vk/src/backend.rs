// SPDX-License-Identifier: CEPL-1.0
use anyhow::{bail, Context, Result};
use ash::khr::swapchain;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, warn};
use trigon_render::{FrameError, PresentBackend, RenderSize, SwapStatus};

use crate::caps::SurfaceSupport;
use crate::commands::{check_parity, CommandBuffers, CommandPool};
use crate::config::PresenterConfig;
use crate::device::Gpu;
use crate::instance::InstanceBundle;
use crate::pipeline_cache::PipelineCache;
use crate::shader::ShaderModules;
use crate::swapchain::{negotiate, SurfaceNegotiatedConfig, Swapchain};
use crate::sync::FrameSlots;
use crate::target::{PipelineLayout, RenderTargets};

/// Everything derived from one swapchain. Fields drop in declaration order:
/// command buffers, then render targets, then views and the swapchain itself.
pub struct SwapchainGeneration {
    pub commands: CommandBuffers,
    pub targets: RenderTargets,
    pub swapchain: Swapchain,
    pub negotiated: SurfaceNegotiatedConfig,
}

/// Objects that survive every rebuild.
struct Fixed {
    pool: CommandPool,
    layout: PipelineLayout,
    shaders: ShaderModules,
    cache: PipelineCache,
}

fn device_error(e: vk::Result, wrap: impl FnOnce(String) -> FrameError) -> FrameError {
    match e {
        vk::Result::ERROR_DEVICE_LOST => FrameError::DeviceLost,
        other => wrap(other.to_string()),
    }
}

/// Builds the next generation, or `None` when the surface currently has no area.
unsafe fn build_generation(
    inst: &InstanceBundle,
    gpu: &Gpu,
    loader: &swapchain::Device,
    fixed: &Fixed,
    cfg: &PresenterConfig,
    hint: RenderSize,
    old: vk::SwapchainKHR,
) -> Result<Option<SwapchainGeneration>> {
    let support = SurfaceSupport::query(&inst.surface_loader, gpu.phys, inst.surface)
        .context("query surface support")?;
    let negotiated = negotiate(&support, cfg, hint)?;
    if negotiated.extent.is_empty() {
        return Ok(None);
    }

    let swapchain = Swapchain::build(
        &gpu.device,
        loader,
        inst.surface,
        &gpu.families,
        &negotiated,
        old,
    )?;
    let targets = RenderTargets::build(
        &gpu.device,
        fixed.cache.handle,
        &fixed.shaders,
        &fixed.layout,
        &swapchain,
    )?;
    let commands = CommandBuffers::record(&gpu.device, &fixed.pool, &targets)?;
    check_parity(targets.framebuffers.len(), commands.len())?;

    Ok(Some(SwapchainGeneration {
        commands,
        targets,
        swapchain,
        negotiated,
    }))
}

/// Vulkan side of the frame presenter.
///
/// Field order is teardown order: swapchain generation, frame slots, fixed
/// pipeline objects, then device, then surface and instance.
pub struct VkBackend {
    generation: SwapchainGeneration,
    slots: FrameSlots,
    fixed: Fixed,
    swapchain_loader: swapchain::Device,
    gpu: Gpu,
    inst: InstanceBundle,
    cfg: PresenterConfig,
    /// Size of the window, used when the surface leaves sizing to the swapchain.
    hint: RenderSize,
}

impl VkBackend {
    /// # Safety
    /// The window must outlive the backend.
    pub unsafe fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        cfg: PresenterConfig,
    ) -> Result<Self> {
        cfg.validate()?;

        let inst = InstanceBundle::new(window, display, &cfg)?;
        let gpu = Gpu::select(&inst, &cfg)?;
        let swapchain_loader = swapchain::Device::new(&inst.instance, &gpu.device);

        let props = inst.instance.get_physical_device_properties(gpu.phys);
        let fixed = Fixed {
            cache: PipelineCache::open(&gpu.device, &props, cfg.pipeline_cache_dir.as_deref())?,
            shaders: ShaderModules::load(&gpu.device, cfg.shader_dir.as_deref())?,
            layout: PipelineLayout::new(&gpu.device)?,
            pool: CommandPool::new(&gpu.device, gpu.families.graphics)?,
        };
        let slots = FrameSlots::new(&gpu.device, cfg.frames_in_flight)?;

        let Some(generation) = build_generation(
            &inst,
            &gpu,
            &swapchain_loader,
            &fixed,
            &cfg,
            size,
            vk::SwapchainKHR::null(),
        )?
        else {
            bail!("surface has zero area at startup");
        };

        Ok(VkBackend {
            generation,
            slots,
            fixed,
            swapchain_loader,
            gpu,
            inst,
            cfg,
            hint: size,
        })
    }

    /// Extent of the live generation.
    pub fn extent(&self) -> RenderSize {
        self.generation.negotiated.extent
    }

    pub fn generation(&self) -> &SwapchainGeneration {
        &self.generation
    }

    pub fn device_name(&self) -> &str {
        &self.gpu.name
    }

    pub fn set_size_hint(&mut self, size: RenderSize) {
        self.hint = size;
    }
}

impl PresentBackend for VkBackend {
    fn frame_slots(&self) -> usize {
        self.slots.count()
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<(), FrameError> {
        let fence = self.slots.get(slot).in_flight;
        unsafe { self.gpu.device.wait_for_fences(&[fence], true, u64::MAX) }
            .map_err(|e| device_error(e, |reason| FrameError::FenceWait { slot, reason }))
    }

    fn reset_slot(&mut self, slot: usize) -> Result<(), FrameError> {
        let fence = self.slots.get(slot).in_flight;
        unsafe { self.gpu.device.reset_fences(&[fence]) }
            .map_err(|e| device_error(e, |reason| FrameError::FenceReset { slot, reason }))
    }

    fn acquire(&mut self, slot: usize) -> Result<SwapStatus<u32>, FrameError> {
        let semaphore = self.slots.get(slot).image_available;
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.generation.swapchain.handle,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };
        match result {
            Ok((image, false)) => Ok(SwapStatus::Ready(image)),
            Ok((image, true)) => Ok(SwapStatus::Suboptimal(image)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(SwapStatus::OutOfDate),
            Err(e) => Err(device_error(e, FrameError::Acquire)),
        }
    }

    fn discard_acquire(&mut self, slot: usize) -> Result<(), FrameError> {
        // Wait-only submission: no command buffers, no fence. The rebuild that
        // follows idles the device before the semaphore is reused.
        let semaphore = self.slots.get(slot).image_available;
        let wait_stages = [vk::PipelineStageFlags::ALL_COMMANDS];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &semaphore,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.gpu.device.queue_submit(
                self.gpu.graphics_queue,
                std::slice::from_ref(&submit),
                vk::Fence::null(),
            )
        }
        .map_err(|e| device_error(e, FrameError::Submit))
    }

    fn submit(&mut self, slot: usize, image: u32) -> Result<(), FrameError> {
        let s = *self.slots.get(slot);
        let cmd = self.generation.commands.get(image).ok_or_else(|| {
            FrameError::Submit(format!(
                "image {image} has no command buffer ({} recorded)",
                self.generation.commands.len()
            ))
        })?;

        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &s.image_available,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &s.render_finished,
            ..Default::default()
        };
        unsafe {
            self.gpu.device.queue_submit(
                self.gpu.graphics_queue,
                std::slice::from_ref(&submit),
                s.in_flight,
            )
        }
        .map_err(|e| device_error(e, FrameError::Submit))
    }

    fn present(&mut self, slot: usize, image: u32) -> Result<SwapStatus<()>, FrameError> {
        let render_finished = self.slots.get(slot).render_finished;
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &render_finished,
            swapchain_count: 1,
            p_swapchains: &self.generation.swapchain.handle,
            p_image_indices: &image,
            ..Default::default()
        };
        match unsafe {
            self.swapchain_loader
                .queue_present(self.gpu.present_queue, &present)
        } {
            Ok(false) => Ok(SwapStatus::Ready(())),
            Ok(true) => Ok(SwapStatus::Suboptimal(())),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(SwapStatus::OutOfDate),
            Err(e) => Err(device_error(e, FrameError::Present)),
        }
    }

    fn surface_extent(&mut self) -> Result<RenderSize, FrameError> {
        let caps = unsafe {
            self.inst
                .surface_loader
                .get_physical_device_surface_capabilities(self.gpu.phys, self.inst.surface)
        }
        .context("get_physical_device_surface_capabilities")?;
        if caps.current_extent.width == u32::MAX {
            return Ok(self.hint);
        }
        Ok(RenderSize::new(
            caps.current_extent.width,
            caps.current_extent.height,
        ))
    }

    fn rebuild(&mut self, extent: RenderSize) -> Result<RenderSize, FrameError> {
        self.hint = extent;
        let next = unsafe {
            build_generation(
                &self.inst,
                &self.gpu,
                &self.swapchain_loader,
                &self.fixed,
                &self.cfg,
                extent,
                self.generation.swapchain.handle,
            )
        }?;
        let Some(next) = next else {
            debug!("surface lost its area before the rebuild");
            return Ok(RenderSize::new(0, 0));
        };

        let before = self.generation.negotiated;
        if next.negotiated.format != before.format
            || next.negotiated.present_mode != before.present_mode
        {
            warn!(
                "renegotiated surface: {:?}/{:?} -> {:?}/{:?}",
                before.format.format,
                before.present_mode,
                next.negotiated.format.format,
                next.negotiated.present_mode
            );
        }

        let built = next.negotiated.extent;
        // Drops the previous generation, including the retired swapchain.
        self.generation = next;
        Ok(built)
    }

    fn wait_idle(&mut self) -> Result<(), FrameError> {
        unsafe { self.gpu.device.device_wait_idle() }
            .map_err(|e| device_error(e, |reason| FrameError::Backend(anyhow::anyhow!(reason))))
    }
}

impl Drop for VkBackend {
    fn drop(&mut self) {
        unsafe {
            self.gpu.device.device_wait_idle().ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_lost_maps_to_fatal_variant() {
        let err = device_error(vk::Result::ERROR_DEVICE_LOST, FrameError::Present);
        assert!(matches!(err, FrameError::DeviceLost));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_other_present_errors_stay_recoverable() {
        let err = device_error(vk::Result::ERROR_SURFACE_LOST_KHR, FrameError::Present);
        assert!(matches!(err, FrameError::Present(_)));
        assert!(!err.is_fatal());
    }
}
