// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::khr::swapchain;
use ash::vk;
use tracing::{debug, info};
use trigon_render::{clamp_extent, pick_preferred, NegotiationError, RenderSize};

use crate::caps::SurfaceSupport;
use crate::config::{PresenterConfig, DEFAULT_PRESENT_MODE, DEFAULT_SURFACE_FORMAT};
use crate::device::QueueFamilies;

/// A (format, color space) pair as the surface reports it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatPair {
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
}

impl From<vk::SurfaceFormatKHR> for FormatPair {
    fn from(f: vk::SurfaceFormatKHR) -> Self {
        FormatPair {
            format: f.format,
            color_space: f.color_space,
        }
    }
}

/// What one swapchain generation is built with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceNegotiatedConfig {
    pub format: FormatPair,
    pub present_mode: vk::PresentModeKHR,
    pub min_image_count: u32,
    /// 0 means no limit.
    pub max_image_count: u32,
    pub min_extent: RenderSize,
    pub max_extent: RenderSize,
    pub current_transform: vk::SurfaceTransformFlagsKHR,
    pub extent: RenderSize,
}

fn render_size(e: vk::Extent2D) -> RenderSize {
    RenderSize::new(e.width, e.height)
}

/// Picks format, present mode and extent for `support`. `hint` is used only when
/// the surface lets the swapchain decide its size.
pub fn negotiate(
    support: &SurfaceSupport,
    cfg: &PresenterConfig,
    hint: RenderSize,
) -> Result<SurfaceNegotiatedConfig, NegotiationError> {
    let requested_formats: Vec<FormatPair> = cfg
        .surface_formats
        .iter()
        .map(|f| FormatPair {
            format: f.format(),
            color_space: f.color_space(),
        })
        .collect();
    let default_format = FormatPair {
        format: DEFAULT_SURFACE_FORMAT.format(),
        color_space: DEFAULT_SURFACE_FORMAT.color_space(),
    };
    let mut supported_formats: Vec<FormatPair> =
        support.formats.iter().copied().map(FormatPair::from).collect();
    // A lone UNDEFINED entry means the surface takes any format.
    let any_format = matches!(
        supported_formats.as_slice(),
        [only] if only.format == vk::Format::UNDEFINED
    );
    if any_format {
        supported_formats = requested_formats.clone();
        supported_formats.push(default_format);
    }
    let format = pick_preferred(
        "surface format",
        &requested_formats,
        &supported_formats,
        default_format,
    )?;

    let requested_modes: Vec<vk::PresentModeKHR> =
        cfg.present_modes.iter().map(|m| m.to_vk()).collect();
    let present_mode = pick_preferred(
        "present mode",
        &requested_modes,
        &support.present_modes,
        DEFAULT_PRESENT_MODE.to_vk(),
    )?;

    let caps = &support.capabilities;
    let min_extent = render_size(caps.min_image_extent);
    let max_extent = render_size(caps.max_image_extent);
    let wanted = if caps.current_extent.width != u32::MAX {
        render_size(caps.current_extent)
    } else {
        hint
    };
    let extent = clamp_extent(min_extent, max_extent, wanted)?;

    Ok(SurfaceNegotiatedConfig {
        format,
        present_mode,
        min_image_count: caps.min_image_count,
        max_image_count: caps.max_image_count,
        min_extent,
        max_extent,
        current_transform: caps.current_transform,
        extent,
    })
}

/// Concurrent over both families when they differ, else exclusive with no list.
pub fn sharing_mode(families: &QueueFamilies) -> (vk::SharingMode, Vec<u32>) {
    if families.is_shared() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (vk::SharingMode::CONCURRENT, families.unique_indices())
    }
}

/// Swapchain handle, its images and one view per image.
pub struct Swapchain {
    device: ash::Device,
    loader: swapchain::Device,
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    /// `old` may be null; a non-null handle is retired by the new swapchain but
    /// still has to be destroyed by its owner.
    ///
    /// # Safety
    /// `device`, `loader` and `surface` must belong together, and nothing may be
    /// using `old` when the new swapchain is created.
    pub unsafe fn build(
        device: &ash::Device,
        loader: &swapchain::Device,
        surface: vk::SurfaceKHR,
        families: &QueueFamilies,
        negotiated: &SurfaceNegotiatedConfig,
        old: vk::SwapchainKHR,
    ) -> Result<Self> {
        let (image_sharing_mode, indices) = sharing_mode(families);
        let extent = vk::Extent2D {
            width: negotiated.extent.width,
            height: negotiated.extent.height,
        };

        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface,
            min_image_count: negotiated.min_image_count,
            image_format: negotiated.format.format,
            image_color_space: negotiated.format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode,
            queue_family_index_count: indices.len() as u32,
            p_queue_family_indices: if indices.is_empty() {
                std::ptr::null()
            } else {
                indices.as_ptr()
            },
            pre_transform: negotiated.current_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: negotiated.present_mode,
            clipped: vk::TRUE,
            old_swapchain: old,
            ..Default::default()
        };

        let handle = loader
            .create_swapchain(&info, None)
            .context("create_swapchain")?;
        let mut sc = Swapchain {
            device: device.clone(),
            loader: loader.clone(),
            handle,
            images: Vec::new(),
            views: Vec::new(),
            format: negotiated.format.format,
            extent,
        };
        sc.images = loader
            .get_swapchain_images(handle)
            .context("get_swapchain_images")?;

        for &image in &sc.images {
            let view_info = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: sc.format,
                components: vk::ComponentMapping::default(),
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            let view = device
                .create_image_view(&view_info, None)
                .context("create_image_view")?;
            sc.views.push(view);
        }
        debug!("{} swapchain images, {} views", sc.images.len(), sc.views.len());

        info!(
            "swapchain {}x{}, format {:?} / {:?}, present mode {:?}, min images {}",
            extent.width,
            extent.height,
            negotiated.format.format,
            negotiated.format.color_space,
            negotiated.present_mode,
            negotiated.min_image_count
        );
        Ok(sc)
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.views {
                self.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.handle, None);
        }
    }
}
