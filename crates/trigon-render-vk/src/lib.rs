// SPDX-License-Identifier: CEPL-1.0
//! Vulkan renderer: one triangle per frame through a rebuildable swapchain.

use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::info;
use trigon_render::{FrameOutcome, FramePresenter, RenderSize, Renderer};

mod backend;
pub mod caps;
pub mod commands;
pub mod config;
pub mod device;
pub mod instance;
pub mod pipeline_cache;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod target;

pub use backend::{SwapchainGeneration, VkBackend};
pub use config::{ConfigError, PresentMode, PresenterConfig, SurfaceFormat, UnknownName};

pub struct VkRenderer {
    presenter: FramePresenter<VkBackend>,
}

impl VkRenderer {
    /// Extent of the live swapchain.
    pub fn extent(&self) -> RenderSize {
        self.presenter.extent()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.presenter.frames_in_flight()
    }

    pub fn rebuild_count(&self) -> u64 {
        self.presenter.rebuild_count()
    }

    pub fn is_suspended(&self) -> bool {
        self.presenter.is_suspended()
    }

    pub fn device_name(&self) -> &str {
        self.presenter.backend().device_name()
    }
}

impl Renderer for VkRenderer {
    type Config = PresenterConfig;

    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: PresenterConfig,
    ) -> Result<Self> {
        let backend = unsafe { VkBackend::new(window, display, size, config)? };
        let extent = backend.extent();
        let presenter = FramePresenter::new(backend, extent)?;
        info!(
            "vk renderer ready on {} ({} images)",
            presenter.backend().device_name(),
            presenter.backend().generation().swapchain.images.len()
        );
        Ok(VkRenderer { presenter })
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        self.presenter.backend_mut().set_size_hint(size);
        self.presenter.request_rebuild(size);
        Ok(())
    }

    fn render(&mut self) -> Result<FrameOutcome> {
        Ok(self.presenter.render_one_frame()?)
    }

    fn shutdown(self) -> Result<()> {
        self.presenter.shutdown()?;
        Ok(())
    }
}
