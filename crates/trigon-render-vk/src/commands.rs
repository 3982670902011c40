// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::vk;
use tracing::debug;
use trigon_render::FrameError;

use crate::target::RenderTargets;

const CLEAR_BLACK: vk::ClearValue = vk::ClearValue {
    color: vk::ClearColorValue {
        float32: [0.0, 0.0, 0.0, 1.0],
    },
};

/// One recorded command buffer per framebuffer, or the mismatch is fatal.
pub fn check_parity(framebuffers: usize, command_buffers: usize) -> Result<(), FrameError> {
    if framebuffers != command_buffers {
        return Err(FrameError::CountMismatch {
            framebuffers,
            command_buffers,
        });
    }
    Ok(())
}

/// Pool on the graphics family; lives as long as the device.
pub struct CommandPool {
    device: ash::Device,
    pub handle: vk::CommandPool,
}

impl CommandPool {
    /// # Safety
    /// Must be dropped before `device` is destroyed.
    pub unsafe fn new(device: &ash::Device, graphics_family: u32) -> Result<Self> {
        let info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: graphics_family,
            ..Default::default()
        };
        let handle = device
            .create_command_pool(&info, None)
            .context("create_command_pool")?;
        Ok(CommandPool {
            device: device.clone(),
            handle,
        })
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.handle, None);
        }
    }
}

/// Command buffers of one swapchain generation, indexed by image.
pub struct CommandBuffers {
    device: ash::Device,
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
}

impl CommandBuffers {
    /// Allocates one primary buffer per framebuffer and records the draw into each.
    ///
    /// # Safety
    /// `pool` must outlive the buffers, and the device must not be executing them.
    pub unsafe fn record(
        device: &ash::Device,
        pool: &CommandPool,
        targets: &RenderTargets,
    ) -> Result<Self> {
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: pool.handle,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: targets.framebuffers.len() as u32,
            ..Default::default()
        };
        let buffers = device
            .allocate_command_buffers(&alloc_info)
            .context("allocate_command_buffers")?;
        let recorded = CommandBuffers {
            device: device.clone(),
            pool: pool.handle,
            buffers,
        };
        check_parity(targets.framebuffers.len(), recorded.len())?;

        for (&cmd, &framebuffer) in recorded.buffers.iter().zip(&targets.framebuffers) {
            record_one(device, cmd, targets, framebuffer)?;
        }
        debug!("recorded {} command buffers", recorded.len());
        Ok(recorded)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn get(&self, image: u32) -> Option<vk::CommandBuffer> {
        self.buffers.get(image as usize).copied()
    }
}

unsafe fn record_one(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    targets: &RenderTargets,
    framebuffer: vk::Framebuffer,
) -> Result<()> {
    let begin = vk::CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
        ..Default::default()
    };
    device
        .begin_command_buffer(cmd, &begin)
        .context("begin_command_buffer")?;

    let clear = [CLEAR_BLACK];
    let pass_begin = vk::RenderPassBeginInfo {
        s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
        render_pass: targets.render_pass,
        framebuffer,
        render_area: vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: targets.extent,
        },
        clear_value_count: clear.len() as u32,
        p_clear_values: clear.as_ptr(),
        ..Default::default()
    };
    device.cmd_begin_render_pass(cmd, &pass_begin, vk::SubpassContents::INLINE);
    device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, targets.pipeline);
    device.cmd_draw(cmd, 3, 1, 0, 0);
    device.cmd_end_render_pass(cmd);

    device
        .end_command_buffer(cmd)
        .context("end_command_buffer")?;
    Ok(())
}

impl Drop for CommandBuffers {
    fn drop(&mut self) {
        if self.is_empty() {
            return;
        }
        unsafe {
            self.device.free_command_buffers(self.pool, &self.buffers);
        }
    }
}
