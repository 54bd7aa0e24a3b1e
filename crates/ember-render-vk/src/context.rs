// SPDX-License-Identifier: CEPL-1.0
//! Instance and logical-device lifetimes. Resources hold an `Arc` to the
//! context that created them, so the device outlives everything built on it.

use anyhow::{Context, Result};
use ash::ext::debug_utils;
use ash::vk;
use ash::Entry;
use std::ffi::{c_char, c_void, CStr};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

use crate::device::{self, QueueFamilyIndices, REQUIRED_DEVICE_EXTENSIONS};
use crate::error::{RenderError, RenderResult};
use crate::init::InitStep;
use crate::surface::Surface;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const APP_NAME: &CStr = c"Vulkan Engine";
const ENGINE_NAME: &CStr = c"ember";

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader hands us a valid callback-data struct for the duration of the call.
    let msg = unsafe {
        let p = (*data).p_message;
        if p.is_null() {
            return vk::FALSE;
        }
        CStr::from_ptr(p).to_string_lossy()
    };
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!("[vulkan] {msg}");
    } else {
        trace!("[vulkan] {msg}");
    }
    vk::FALSE
}

struct DebugMessenger {
    loader: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

pub struct InstanceContext {
    debug: Option<DebugMessenger>,
    instance: ash::Instance,
    entry: Entry,
}

impl InstanceContext {
    /// Loads Vulkan and creates an instance enabling `surface_extensions`.
    /// Validation is only honoured in debug builds and only if the layer exists.
    pub fn new(surface_extensions: &[*const c_char], validation: bool) -> Result<Arc<Self>> {
        // SAFETY: loading the system Vulkan library has no preconditions we can violate here.
        let entry = unsafe { Entry::load() }
            .map_err(RenderError::from)
            .context(InitStep::LoadVulkan)?;

        let available = unsafe { entry.enumerate_instance_extension_properties(None) }
            .map_err(RenderError::from)
            .context(InitStep::CreateInstance)?;
        let required: Vec<&CStr> = surface_extensions
            .iter()
            // SAFETY: ash_window hands out pointers to static NUL-terminated names.
            .map(|&p| unsafe { CStr::from_ptr(p) })
            .collect();
        let missing = device::missing_extensions(required.iter().copied(), &available);
        if !missing.is_empty() {
            return Err(RenderError::MissingInstanceExtensions(missing)).context(InitStep::CreateInstance);
        }

        let validation = validation && cfg!(debug_assertions) && layer_available(&entry, VALIDATION_LAYER);
        let mut extensions = surface_extensions.to_vec();
        let mut layers = Vec::new();
        if validation {
            extensions.push(debug_utils::NAME.as_ptr());
            layers.push(VALIDATION_LAYER.as_ptr());
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(APP_NAME)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(ENGINE_NAME)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);
        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(RenderError::from)
            .context(InitStep::CreateInstance)?;
        info!("vk: instance created (validation={validation})");

        let debug = if validation {
            match create_debug_messenger(&entry, &instance) {
                Ok(m) => Some(m),
                Err(e) => {
                    // SAFETY: nothing else was created from this instance yet.
                    unsafe { instance.destroy_instance(None) };
                    return Err(e).context(InitStep::SetupDebugMessenger);
                }
            }
        } else {
            None
        };

        Ok(Arc::new(Self { debug, instance, entry }))
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }
}

fn layer_available(entry: &Entry, name: &CStr) -> bool {
    let layers = match unsafe { entry.enumerate_instance_layer_properties() } {
        Ok(l) => l,
        Err(e) => {
            warn!("vk: cannot enumerate instance layers: {e}");
            return false;
        }
    };
    let found = layers
        .iter()
        .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == name));
    if !found {
        warn!("vk: {} not installed, continuing without validation", name.to_string_lossy());
    }
    found
}

fn create_debug_messenger(entry: &Entry, instance: &ash::Instance) -> RenderResult<DebugMessenger> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));
    let handle = unsafe { loader.create_debug_utils_messenger(&ci, None)? };
    Ok(DebugMessenger { loader, handle })
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        // SAFETY: every child object holds an Arc to us, so none are left.
        unsafe {
            if let Some(dbg) = self.debug.take() {
                dbg.loader.destroy_debug_utils_messenger(dbg.handle, None);
            }
            self.instance.destroy_instance(None);
        }
        debug!("vk: instance destroyed");
    }
}

/// Logical device plus the physical-device facts resource code needs.
/// Passed explicitly to every loader and resource constructor.
pub struct DeviceContext {
    device: ash::Device,
    command_pool: vk::CommandPool,
    pub physical: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub graphics_family: u32,
    pub present_family: u32,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub anisotropy_enabled: bool,
    instance: Arc<InstanceContext>,
}

impl DeviceContext {
    /// Selects a presenting device for `surface` and creates the logical
    /// device, its queues and the shared command pool.
    pub fn new(instance: &Arc<InstanceContext>, surface: &Surface) -> Result<Arc<Self>> {
        let (phys, queues) = select_physical_device(instance, surface).context(InitStep::SelectPhysicalDevice)?;
        let (graphics, present) = match (queues.graphics, queues.present) {
            (Some(g), Some(p)) => (g, p),
            _ => {
                return Err(RenderError::NoSuitableDevice { inspected: 1 }).context(InitStep::SelectPhysicalDevice)
            }
        };
        let ctx = Self::create(instance, phys, graphics, present, true)?;
        Ok(Arc::new(ctx))
    }

    /// Device without presentation support: the first adapter with a graphics
    /// queue. Used for off-screen uploads and read-backs.
    pub fn headless(instance: &Arc<InstanceContext>) -> Result<Arc<Self>> {
        let devices = unsafe { instance.instance().enumerate_physical_devices() }
            .map_err(RenderError::from)
            .context(InitStep::SelectPhysicalDevice)?;
        for phys in devices.iter().copied() {
            let families = unsafe { instance.instance().get_physical_device_queue_family_properties(phys) };
            let graphics = families
                .iter()
                .position(|f| f.queue_count > 0 && f.queue_flags.contains(vk::QueueFlags::GRAPHICS));
            if let Some(g) = graphics {
                let ctx = Self::create(instance, phys, g as u32, g as u32, false)?;
                return Ok(Arc::new(ctx));
            }
        }
        Err(RenderError::NoSuitableDevice {
            inspected: devices.len(),
        })
        .context(InitStep::SelectPhysicalDevice)
    }

    fn create(
        instance: &Arc<InstanceContext>,
        physical: vk::PhysicalDevice,
        graphics_family: u32,
        present_family: u32,
        presenting: bool,
    ) -> Result<Self> {
        let raw = instance.instance();
        let properties = unsafe { raw.get_physical_device_properties(physical) };
        let memory_properties = unsafe { raw.get_physical_device_memory_properties(physical) };
        let supported = unsafe { raw.get_physical_device_features(physical) };

        let families = QueueFamilyIndices {
            graphics: Some(graphics_family),
            present: Some(present_family),
        };
        let priorities = [1.0_f32];
        let queue_infos: Vec<_> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect();

        let anisotropy_enabled = supported.sampler_anisotropy == vk::TRUE;
        let features = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: supported.sampler_anisotropy,
            ..Default::default()
        };
        let extensions: Vec<*const c_char> = if presenting {
            REQUIRED_DEVICE_EXTENSIONS.iter().map(|e| e.as_ptr()).collect()
        } else {
            Vec::new()
        };
        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_features(&features)
            .enabled_extension_names(&extensions);

        let device = unsafe { raw.create_device(physical, &create_info, None) }
            .map_err(RenderError::from)
            .context(InitStep::CreateLogicalDevice)?;
        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(graphics_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = match unsafe { device.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                // SAFETY: the device has no children yet.
                unsafe { device.destroy_device(None) };
                return Err(RenderError::from(e)).context(InitStep::CreateCommandPool);
            }
        };

        info!(
            "vk: device {} ready (graphics family {graphics_family}, present family {present_family})",
            device::device_name(&properties)
        );

        Ok(Self {
            device,
            command_pool,
            physical,
            properties,
            memory_properties,
            graphics_family,
            present_family,
            graphics_queue,
            present_queue,
            anisotropy_enabled,
            instance: Arc::clone(instance),
        })
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn instance(&self) -> &ash::Instance {
        self.instance.instance()
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.properties.limits
    }

    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance()
                .get_physical_device_format_properties(self.physical, format)
        }
    }

    pub fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        // SAFETY: all resources hold an Arc<DeviceContext>; we are the last user.
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
        }
        debug!("vk: device destroyed");
    }
}

fn select_physical_device(
    instance: &InstanceContext,
    surface: &Surface,
) -> RenderResult<(vk::PhysicalDevice, QueueFamilyIndices)> {
    let raw = instance.instance();
    let devices = unsafe { raw.enumerate_physical_devices()? };
    let mut candidates = Vec::with_capacity(devices.len());
    for &phys in &devices {
        // SAFETY: `phys` was just enumerated from this instance; the surface is alive.
        candidates.push(unsafe { device::describe_device(raw, surface.loader(), surface.handle(), phys)? });
    }
    let (idx, queues) = device::select_device(&candidates)?;
    Ok((devices[idx], queues))
}
