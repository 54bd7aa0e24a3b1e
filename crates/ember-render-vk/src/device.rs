// SPDX-License-Identifier: CEPL-1.0
//! Physical device selection. Vulkan queries are flattened into
//! [`DeviceCandidate`]s first; choosing among them is plain data logic.

use ash::khr::{surface, swapchain};
use ash::vk;
use bitflags::bitflags;
use std::ffi::CStr;
use tracing::{info, warn};

use crate::error::{RenderError, RenderResult};

/// Device extensions a presenting device must support.
pub const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 1] = [swapchain::NAME];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Distinct family indices, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(2);
        for idx in [self.graphics, self.present].into_iter().flatten() {
            if !out.contains(&idx) {
                out.push(idx);
            }
        }
        out
    }
}

/// What one queue family of a candidate device can do.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilySupport {
    pub queue_count: u32,
    pub graphics: bool,
    pub present: bool,
}

/// Walks families in order and stops as soon as both roles are filled.
/// Families without queues are skipped.
pub fn find_queue_families(families: &[QueueFamilySupport]) -> QueueFamilyIndices {
    let mut found = QueueFamilyIndices::default();
    for (i, family) in families.iter().enumerate() {
        if family.queue_count == 0 {
            continue;
        }
        if family.graphics && found.graphics.is_none() {
            found.graphics = Some(i as u32);
        }
        if family.present && found.present.is_none() {
            found.present = Some(i as u32);
        }
        if found.is_complete() {
            break;
        }
    }
    found
}

bitflags! {
    /// Requirements a device failed to meet.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Unsuitable: u32 {
        const NOT_DISCRETE = 1 << 0;
        const NO_GRAPHICS_QUEUE = 1 << 1;
        const NO_PRESENT_QUEUE = 1 << 2;
        const MISSING_EXTENSIONS = 1 << 3;
        const NO_SURFACE_FORMATS = 1 << 4;
        const NO_PRESENT_MODES = 1 << 5;
        const NO_ANISOTROPY = 1 << 6;
    }
}

/// Everything selection needs to know about one physical device.
#[derive(Clone, Debug)]
pub struct DeviceCandidate {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub queue_families: Vec<QueueFamilySupport>,
    pub missing_extensions: Vec<String>,
    pub surface_format_count: usize,
    pub present_mode_count: usize,
    pub sampler_anisotropy: bool,
}

impl DeviceCandidate {
    pub fn queue_indices(&self) -> QueueFamilyIndices {
        find_queue_families(&self.queue_families)
    }

    /// Empty when the device qualifies.
    pub fn rejection(&self) -> Unsuitable {
        let mut why = Unsuitable::empty();
        if self.device_type != vk::PhysicalDeviceType::DISCRETE_GPU {
            why |= Unsuitable::NOT_DISCRETE;
        }
        let queues = self.queue_indices();
        if queues.graphics.is_none() {
            why |= Unsuitable::NO_GRAPHICS_QUEUE;
        }
        if queues.present.is_none() {
            why |= Unsuitable::NO_PRESENT_QUEUE;
        }
        if !self.missing_extensions.is_empty() {
            why |= Unsuitable::MISSING_EXTENSIONS;
        } else {
            // Surface support is only meaningful once the swapchain extension exists.
            if self.surface_format_count == 0 {
                why |= Unsuitable::NO_SURFACE_FORMATS;
            }
            if self.present_mode_count == 0 {
                why |= Unsuitable::NO_PRESENT_MODES;
            }
        }
        if !self.sampler_anisotropy {
            why |= Unsuitable::NO_ANISOTROPY;
        }
        why
    }
}

/// First qualifying candidate in enumeration order, with its queue families.
pub fn select_device(candidates: &[DeviceCandidate]) -> RenderResult<(usize, QueueFamilyIndices)> {
    for (i, candidate) in candidates.iter().enumerate() {
        let why = candidate.rejection();
        if why.is_empty() {
            info!("vk: selected device {} ({:?})", candidate.name, candidate.device_type);
            return Ok((i, candidate.queue_indices()));
        }
        warn!("vk: rejected device {}: {:?}", candidate.name, why);
    }
    Err(RenderError::NoSuitableDevice {
        inspected: candidates.len(),
    })
}

/// Names from `required` that are absent from `available`.
pub fn missing_extensions<'a>(
    required: impl IntoIterator<Item = &'a CStr>,
    available: &[vk::ExtensionProperties],
) -> Vec<String> {
    required
        .into_iter()
        .filter(|want| {
            !available
                .iter()
                .any(|have| have.extension_name_as_c_str().is_ok_and(|name| name == *want))
        })
        .map(|want| want.to_string_lossy().into_owned())
        .collect()
}

pub(crate) fn device_name(props: &vk::PhysicalDeviceProperties) -> String {
    props
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "<unnamed>".to_owned())
}

/// Queries one physical device against `surface`.
///
/// # Safety
/// `phys` must come from `instance` and `surface` must be alive.
pub(crate) unsafe fn describe_device(
    instance: &ash::Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
) -> RenderResult<DeviceCandidate> {
    let props = unsafe { instance.get_physical_device_properties(phys) };
    let features = unsafe { instance.get_physical_device_features(phys) };
    let families = unsafe { instance.get_physical_device_queue_family_properties(phys) };

    let mut queue_families = Vec::with_capacity(families.len());
    for (i, family) in families.iter().enumerate() {
        let present = unsafe {
            surface_loader
                .get_physical_device_surface_support(phys, i as u32, surface)
                .unwrap_or(false)
        };
        queue_families.push(QueueFamilySupport {
            queue_count: family.queue_count,
            graphics: family.queue_flags.contains(vk::QueueFlags::GRAPHICS),
            present,
        });
    }

    let available = unsafe { instance.enumerate_device_extension_properties(phys)? };
    let missing = missing_extensions(REQUIRED_DEVICE_EXTENSIONS, &available);

    let (surface_format_count, present_mode_count) = if missing.is_empty() {
        let formats = unsafe { surface_loader.get_physical_device_surface_formats(phys, surface)? };
        let modes = unsafe { surface_loader.get_physical_device_surface_present_modes(phys, surface)? };
        (formats.len(), modes.len())
    } else {
        (0, 0)
    };

    Ok(DeviceCandidate {
        name: device_name(&props),
        device_type: props.device_type,
        queue_families,
        missing_extensions: missing,
        surface_format_count,
        present_mode_count,
        sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
    })
}
