// SPDX-License-Identifier: CEPL-1.0
//! Buffers and images that own their memory and free it on drop.

use ash::vk;
use std::sync::Arc;
use tracing::debug;

use crate::commands;
use crate::context::DeviceContext;
use crate::error::{RenderError, RenderResult};

/// First memory type allowed by `type_bits` whose flags include `required`.
pub fn find_memory_type_index(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..props.memory_type_count).find(|&i| {
        (type_bits & (1 << i)) != 0 && props.memory_types[i as usize].property_flags.contains(required)
    })
}

fn allocate(
    ctx: &DeviceContext,
    req: vk::MemoryRequirements,
    flags: vk::MemoryPropertyFlags,
) -> RenderResult<vk::DeviceMemory> {
    let memory_type_index = find_memory_type_index(&ctx.memory_properties, req.memory_type_bits, flags).ok_or(
        RenderError::NoCompatibleMemoryType {
            type_bits: req.memory_type_bits,
            flags,
        },
    )?;
    let info = vk::MemoryAllocateInfo::default()
        .allocation_size(req.size)
        .memory_type_index(memory_type_index);
    unsafe { ctx.device().allocate_memory(&info, None) }.map_err(|result| RenderError::BufferAllocation {
        size: req.size,
        result,
    })
}

pub const HOST_VISIBLE: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

pub struct GpuBuffer {
    ctx: Arc<DeviceContext>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl GpuBuffer {
    pub fn new(
        ctx: &Arc<DeviceContext>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        flags: vk::MemoryPropertyFlags,
    ) -> RenderResult<Self> {
        let device = ctx.device();
        let bci = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.create_buffer(&bci, None) }
            .map_err(|result| RenderError::BufferAllocation { size, result })?;
        let req = unsafe { device.get_buffer_memory_requirements(buffer) };
        let memory = match allocate(ctx, req, flags) {
            Ok(m) => m,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };
        // From here on Drop releases both handles.
        let this = Self {
            ctx: Arc::clone(ctx),
            buffer,
            memory,
            size,
        };
        unsafe { device.bind_buffer_memory(buffer, memory, 0)? };
        Ok(this)
    }

    /// Host-visible, coherent staging buffer filled with `data`.
    pub fn staging(ctx: &Arc<DeviceContext>, data: &[u8]) -> RenderResult<Self> {
        let buf = Self::new(
            ctx,
            data.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            HOST_VISIBLE,
        )?;
        buf.write(0, data)?;
        Ok(buf)
    }

    /// Device-local buffer with `usage` holding `data`, uploaded through a
    /// temporary staging buffer. Blocks until the copy completed.
    pub fn device_local(ctx: &Arc<DeviceContext>, usage: vk::BufferUsageFlags, data: &[u8]) -> RenderResult<Self> {
        let staging = Self::staging(ctx, data)?;
        let dst = Self::new(
            ctx,
            staging.size,
            usage | vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        commands::copy_buffer(ctx, staging.buffer, dst.buffer, staging.size)?;
        debug!("vk: uploaded {} bytes via staging", staging.size);
        Ok(dst)
    }

    /// Copies `data` into host-visible memory at `offset`.
    pub fn write(&self, offset: vk::DeviceSize, data: &[u8]) -> RenderResult<()> {
        debug_assert!(offset + data.len() as vk::DeviceSize <= self.size);
        let device = self.ctx.device();
        unsafe {
            let ptr = device.map_memory(
                self.memory,
                offset,
                data.len() as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
            device.unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Reads the whole buffer from host-visible memory.
    pub fn read(&self) -> RenderResult<Vec<u8>> {
        let device = self.ctx.device();
        let mut out = vec![0u8; self.size as usize];
        unsafe {
            let ptr = device.map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())?;
            std::ptr::copy_nonoverlapping(ptr.cast::<u8>(), out.as_mut_ptr(), out.len());
            device.unmap_memory(self.memory);
        }
        Ok(out)
    }

    /// Copies a device-local buffer back to the host through staging.
    pub fn read_back(&self) -> RenderResult<Vec<u8>> {
        let staging = Self::new(&self.ctx, self.size, vk::BufferUsageFlags::TRANSFER_DST, HOST_VISIBLE)?;
        commands::copy_buffer(&self.ctx, self.buffer, staging.buffer, self.size)?;
        staging.read()
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            let d = self.ctx.device();
            d.destroy_buffer(self.buffer, None);
            d.free_memory(self.memory, None);
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub mip_levels: u32,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
}

/// 2D optimal-tiling image in device-local memory, with a view over all mips.
pub struct GpuImage {
    ctx: Arc<DeviceContext>,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
}

impl GpuImage {
    pub fn new(ctx: &Arc<DeviceContext>, desc: ImageDesc) -> RenderResult<Self> {
        let device = ctx.device();
        let ici = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .format(desc.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let image = unsafe { device.create_image(&ici, None)? };
        let req = unsafe { device.get_image_memory_requirements(image) };
        let memory = match allocate(ctx, req, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
            Ok(m) => m,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };
        let mut this = Self {
            ctx: Arc::clone(ctx),
            image,
            memory,
            view: vk::ImageView::null(),
        };
        unsafe { device.bind_image_memory(image, memory, 0)? };
        this.view = create_image_view(device, image, desc.format, desc.aspect, desc.mip_levels)?;
        Ok(this)
    }

    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe {
            let d = self.ctx.device();
            if self.view != vk::ImageView::null() {
                d.destroy_image_view(self.view, None);
            }
            d.destroy_image(self.image, None);
            d.free_memory(self.memory, None);
        }
    }
}

pub fn create_image_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
    level_count: u32,
) -> RenderResult<vk::ImageView> {
    let info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count,
            base_array_layer: 0,
            layer_count: 1,
        });
    Ok(unsafe { device.create_image_view(&info, None)? })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut p = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, &flags) in p.memory_types.iter_mut().zip(types) {
            slot.property_flags = flags;
        }
        p
    }

    #[test]
    fn test_find_memory_type_respects_type_bits() {
        let p = props(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            HOST_VISIBLE,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | HOST_VISIBLE,
        ]);
        assert_eq!(find_memory_type_index(&p, 0b111, HOST_VISIBLE), Some(1));
        assert_eq!(find_memory_type_index(&p, 0b100, HOST_VISIBLE), Some(2));
        assert_eq!(
            find_memory_type_index(&p, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(0)
        );
    }

    #[test]
    fn test_find_memory_type_none() {
        let p = props(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        assert_eq!(find_memory_type_index(&p, 0b1, HOST_VISIBLE), None);
        // Bits beyond memory_type_count are ignored.
        assert_eq!(find_memory_type_index(&p, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL), None);
    }

    #[test]
    fn test_host_visible_flags() {
        assert!(HOST_VISIBLE.contains(vk::MemoryPropertyFlags::HOST_VISIBLE));
        assert!(HOST_VISIBLE.contains(vk::MemoryPropertyFlags::HOST_COHERENT));
    }
}
