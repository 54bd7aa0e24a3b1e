// SPDX-License-Identifier: CEPL-1.0
use ash::khr::swapchain;
use ash::vk;
use ember_render::RenderSize;
use std::sync::Arc;
use tracing::info;

use crate::context::DeviceContext;
use crate::error::RenderResult;
use crate::memory::create_image_view;
use crate::surface::Surface;

pub const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Preferred pair if offered, else the first format. A lone UNDEFINED entry
/// means the surface has no preference.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    match formats {
        [] => PREFERRED_FORMAT,
        [only] if only.format == vk::Format::UNDEFINED => PREFERRED_FORMAT,
        _ => formats
            .iter()
            .copied()
            .find(|f| f.format == PREFERRED_FORMAT.format && f.color_space == PREFERRED_FORMAT.color_space)
            .unwrap_or(formats[0]),
    }
}

pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want.width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want.height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum (0 means uncapped).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        want
    } else {
        want.min(caps.max_image_count)
    }
}

pub fn sharing_mode(graphics: u32, present: u32) -> (vk::SharingMode, Vec<u32>) {
    if graphics == present {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (vk::SharingMode::CONCURRENT, vec![graphics, present])
    }
}

// Info only
fn fmt_name(f: vk::Format) -> &'static str {
    match f {
        vk::Format::B8G8R8A8_UNORM => "B8G8R8A8_UNORM",
        vk::Format::B8G8R8A8_SRGB => "B8G8R8A8_SRGB",
        vk::Format::R8G8B8A8_UNORM => "R8G8B8A8_UNORM",
        vk::Format::R8G8B8A8_SRGB => "R8G8B8A8_SRGB",
        _ => "other",
    }
}

fn pm_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        _ => "other",
    }
}

/// Swapchain plus one color view per image. Views go first on drop.
pub struct Swapchain {
    ctx: Arc<DeviceContext>,
    loader: swapchain::Device,
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    /// Builds a swapchain for `surface`. Any previous swapchain of the surface
    /// must already be destroyed.
    pub fn new(ctx: &Arc<DeviceContext>, surface: &Surface, want: RenderSize) -> RenderResult<Self> {
        let caps = surface.capabilities(ctx.physical)?;
        let formats = surface.formats(ctx.physical)?;
        let modes = surface.present_modes(ctx.physical)?;

        let format = choose_surface_format(&formats);
        let present_mode = choose_present_mode(&modes);
        let extent = choose_extent(&caps, want);
        let image_count = choose_image_count(&caps);
        let (sharing, families) = sharing_mode(ctx.graphics_family, ctx.present_family);

        let info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle())
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing)
            .queue_family_indices(&families)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let loader = swapchain::Device::new(ctx.instance(), ctx.device());
        let handle = unsafe { loader.create_swapchain(&info, None)? };
        let mut this = Self {
            ctx: Arc::clone(ctx),
            loader,
            handle,
            images: Vec::new(),
            views: Vec::new(),
            format,
            present_mode,
            extent,
        };
        this.images = unsafe { this.loader.get_swapchain_images(handle)? };

        info!(
            "vk: swapchain {} / {} {}x{} images={}",
            fmt_name(format.format),
            pm_name(present_mode),
            extent.width,
            extent.height,
            this.images.len()
        );
        Ok(this)
    }

    pub fn create_views(&mut self) -> RenderResult<()> {
        let device = self.ctx.device();
        self.views.reserve(self.images.len());
        for &img in &self.images {
            let view = create_image_view(device, img, self.format.format, vk::ImageAspectFlags::COLOR, 1)?;
            self.views.push(view);
        }
        Ok(())
    }

    /// Next image index and whether the swapchain is suboptimal.
    /// `Err(ERROR_OUT_OF_DATE_KHR)` means it must be rebuilt.
    pub fn acquire(&self, signal: vk::Semaphore) -> Result<(u32, bool), vk::Result> {
        unsafe {
            self.loader
                .acquire_next_image(self.handle, u64::MAX, signal, vk::Fence::null())
        }
    }

    /// Returns `Ok(true)` when presentation reported suboptimal.
    pub fn present(&self, queue: vk::Queue, wait: vk::Semaphore, image_index: u32) -> Result<bool, vk::Result> {
        let present = vk::PresentInfoKHR::default()
            .wait_semaphores(std::slice::from_ref(&wait))
            .swapchains(std::slice::from_ref(&self.handle))
            .image_indices(std::slice::from_ref(&image_index));
        unsafe { self.loader.queue_present(queue, &present) }
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            let d = self.ctx.device();
            for &iv in &self.views {
                d.destroy_image_view(iv, None);
            }
            self.loader.destroy_swapchain(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps_undefined_extent() -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_choose_extent_clamps_to_limits() {
        let caps = caps_undefined_extent();
        let big = choose_extent(&caps, RenderSize::new(8000, 8000));
        assert_eq!((big.width, big.height), (4096, 4096));
        let zero = choose_extent(&caps, RenderSize::new(0, 0));
        assert_eq!((zero.width, zero.height), (1, 1));
        let mid = choose_extent(&caps, RenderSize::new(1000, 750));
        assert_eq!((mid.width, mid.height), (1000, 750));
    }

    #[test]
    fn test_choose_extent_uses_current_extent() {
        let mut caps = caps_undefined_extent();
        caps.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let e = choose_extent(&caps, RenderSize::new(8000, 10));
        assert_eq!((e.width, e.height), (800, 600));
    }

    #[test]
    fn test_determine_image_count() {
        let mut caps = caps_undefined_extent();
        assert_eq!(choose_image_count(&caps), 3);
        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);
        caps.max_image_count = 8;
        assert_eq!(choose_image_count(&caps), 3);
    }

    #[test]
    fn test_choose_present_mode_prefers_mailbox() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
        let fifo_only = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&fifo_only), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&[]), vk::PresentModeKHR::FIFO);
    }

    fn same(a: vk::SurfaceFormatKHR, b: vk::SurfaceFormatKHR) -> bool {
        a.format == b.format && a.color_space == b.color_space
    }

    #[test]
    fn test_choose_surface_format() {
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert!(same(choose_surface_format(&[srgb, PREFERRED_FORMAT]), PREFERRED_FORMAT));
        assert!(same(choose_surface_format(&[srgb]), srgb));

        let undefined = vk::SurfaceFormatKHR {
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert!(same(choose_surface_format(&[undefined]), PREFERRED_FORMAT));
    }

    #[test]
    fn test_sharing_mode() {
        assert_eq!(sharing_mode(0, 0), (vk::SharingMode::EXCLUSIVE, vec![]));
        assert_eq!(sharing_mode(0, 1), (vk::SharingMode::CONCURRENT, vec![0, 1]));
    }
}
