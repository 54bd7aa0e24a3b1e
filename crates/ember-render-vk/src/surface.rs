// SPDX-License-Identifier: CEPL-1.0
use ash::khr::surface;
use ash::vk;
use ember_render::RenderWindow;
use std::ffi::c_char;
use std::sync::Arc;
use tracing::debug;

use crate::context::InstanceContext;
use crate::error::RenderResult;

/// Presentation surface bound to one window.
pub struct Surface {
    loader: surface::Instance,
    handle: vk::SurfaceKHR,
    _instance: Arc<InstanceContext>,
}

impl Surface {
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    #[inline]
    pub fn loader(&self) -> &surface::Instance {
        &self.loader
    }

    pub fn capabilities(&self, phys: vk::PhysicalDevice) -> RenderResult<vk::SurfaceCapabilitiesKHR> {
        Ok(unsafe { self.loader.get_physical_device_surface_capabilities(phys, self.handle)? })
    }

    pub fn formats(&self, phys: vk::PhysicalDevice) -> RenderResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(unsafe { self.loader.get_physical_device_surface_formats(phys, self.handle)? })
    }

    pub fn present_modes(&self, phys: vk::PhysicalDevice) -> RenderResult<Vec<vk::PresentModeKHR>> {
        Ok(unsafe { self.loader.get_physical_device_surface_present_modes(phys, self.handle)? })
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: the swapchain built on this surface is owned by the renderer
        // and dropped first; the instance is kept alive by `_instance`.
        unsafe { self.loader.destroy_surface(self.handle, None) };
        debug!("vk: surface destroyed");
    }
}

/// Vulkan view of a window: the instance extensions it needs and how to
/// bind a surface to it.
pub trait PresentationTarget {
    fn required_surface_extensions(&self) -> RenderResult<&'static [*const c_char]>;
    fn create_surface(&self, instance: &Arc<InstanceContext>) -> RenderResult<Surface>;
}

impl<W: RenderWindow + ?Sized> PresentationTarget for W {
    fn required_surface_extensions(&self) -> RenderResult<&'static [*const c_char]> {
        let display = self.display_handle()?.as_raw();
        Ok(ash_window::enumerate_required_extensions(display)?)
    }

    fn create_surface(&self, instance: &Arc<InstanceContext>) -> RenderResult<Surface> {
        let display = self.display_handle()?.as_raw();
        let window = self.window_handle()?.as_raw();
        // SAFETY: both handles come from a live window that outlives this call,
        // and the instance was created with the extensions reported above.
        let handle = unsafe {
            ash_window::create_surface(instance.entry(), instance.instance(), display, window, None)?
        };
        Ok(Surface {
            loader: surface::Instance::new(instance.entry(), instance.instance()),
            handle,
            _instance: Arc::clone(instance),
        })
    }
}
