// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use lodge_render::{FrameError, PresentPreference, RenderSize};
use tracing::info;

use crate::context::DeviceContext;
use crate::error::VkResultExt;
use crate::memory;

/// One swapchain handle with its images and views. Replaced wholesale on
/// every rebuild.
pub struct SwapchainGeneration {
    pub handle: vk::SwapchainKHR,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
}

/// BGRA8 UNORM in sRGB non-linear space if offered, else whatever the driver
/// lists first. A lone UNDEFINED entry means the surface takes anything.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    let preferred = vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };
    match formats {
        [] => None,
        [only] if only.format == vk::Format::UNDEFINED => Some(preferred),
        _ => formats
            .iter()
            .copied()
            .find(|f| f.format == preferred.format && f.color_space == preferred.color_space)
            .or_else(|| formats.first().copied()),
    }
}

/// FIFO is the only mode every surface must support.
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    pref: PresentPreference,
) -> vk::PresentModeKHR {
    match pref {
        PresentPreference::LowLatency if modes.contains(&vk::PresentModeKHR::MAILBOX) => {
            vk::PresentModeKHR::MAILBOX
        }
        _ => vk::PresentModeKHR::FIFO,
    }
}

pub fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// The surface minimum, capped by the maximum (0 == no maximum).
pub fn image_count_from_caps(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let min = caps.min_image_count.max(1);
    if caps.max_image_count == 0 {
        min
    } else {
        min.min(caps.max_image_count)
    }
}

impl SwapchainGeneration {
    pub unsafe fn create(
        ctx: &DeviceContext,
        want: RenderSize,
        pref: PresentPreference,
    ) -> Result<Self, FrameError> {
        let surf_i = &ctx.surface_loader;
        let caps = surf_i
            .get_physical_device_surface_capabilities(ctx.phys, ctx.surface)
            .or_fatal("get_physical_device_surface_capabilities")?;
        let formats = surf_i
            .get_physical_device_surface_formats(ctx.phys, ctx.surface)
            .or_fatal("get_physical_device_surface_formats")?;
        let modes = surf_i
            .get_physical_device_surface_present_modes(ctx.phys, ctx.surface)
            .or_fatal("get_physical_device_surface_present_modes")?;

        let format = choose_surface_format(&formats).ok_or(FrameError::SurfaceLost)?;
        let present_mode = choose_present_mode(&modes, pref);
        let extent = extent_from_caps(&caps, want);
        let min_image_count = image_count_from_caps(&caps);

        let pre_transform = if caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };

        // Split queues must both be allowed to touch the images.
        let family_indices = ctx.families.unique();
        let (sharing_mode, index_count, p_indices) = if ctx.families.shared() {
            (vk::SharingMode::EXCLUSIVE, 0, std::ptr::null())
        } else {
            (
                vk::SharingMode::CONCURRENT,
                family_indices.len() as u32,
                family_indices.as_ptr(),
            )
        };

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: ctx.surface,
            min_image_count,
            image_format: format.format,
            image_color_space: format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: index_count,
            p_queue_family_indices: p_indices,
            pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            // the previous generation is already destroyed
            old_swapchain: vk::SwapchainKHR::null(),
            ..Default::default()
        };

        let handle = ctx
            .swapchain_loader
            .create_swapchain(&swap_info, None)
            .or_fatal("create_swapchain")?;
        let mut generation = Self {
            handle,
            format,
            present_mode,
            extent,
            images: Vec::new(),
            views: Vec::new(),
        };
        if let Err(e) = generation.create_views(ctx) {
            generation.destroy(ctx);
            return Err(e);
        }

        info!(
            "swapchain: format {:?} / {:?}, present mode {:?}, extent {}x{}, images {} (min {})",
            format.format,
            format.color_space,
            present_mode,
            extent.width,
            extent.height,
            generation.images.len(),
            caps.min_image_count
        );

        Ok(generation)
    }

    unsafe fn create_views(&mut self, ctx: &DeviceContext) -> Result<(), FrameError> {
        self.images = ctx
            .swapchain_loader
            .get_swapchain_images(self.handle)
            .or_fatal("get_swapchain_images")?;
        self.views.reserve(self.images.len());
        for &img in &self.images {
            self.views.push(memory::create_view(
                &ctx.device,
                img,
                self.format.format,
                vk::ImageAspectFlags::COLOR,
            )?);
        }
        Ok(())
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Views first, then the handle (which owns the images).
    pub unsafe fn destroy(self, ctx: &DeviceContext) {
        for &iv in &self.views {
            ctx.device.destroy_image_view(iv, None);
        }
        ctx.swapchain_loader.destroy_swapchain(self.handle, None);
    }
}
