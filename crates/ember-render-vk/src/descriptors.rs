// SPDX-License-Identifier: CEPL-1.0
//! Per-image transform uniforms and the descriptor sets that bind them
//! together with the texture.

use ash::vk;
use ember_math::{align_up, FrameTransforms};
use std::sync::Arc;
use tracing::debug;

use crate::context::DeviceContext;
use crate::error::RenderResult;
use crate::memory::{GpuBuffer, HOST_VISIBLE};
use crate::pipeline::DescriptorSetLayout;
use crate::texture::{Sampler, Texture};

const TRANSFORMS_SIZE: vk::DeviceSize = std::mem::size_of::<FrameTransforms>() as vk::DeviceSize;

/// Distance between two consecutive transform blocks in the shared buffer.
pub fn transform_stride(min_uniform_alignment: vk::DeviceSize) -> vk::DeviceSize {
    align_up(TRANSFORMS_SIZE, min_uniform_alignment)
}

/// One host-visible buffer sliced into one transform block per swapchain
/// image. Each image's draw reads only its own slice.
pub struct TransformBuffer {
    buffer: GpuBuffer,
    stride: vk::DeviceSize,
    slices: usize,
}

impl TransformBuffer {
    pub fn new(ctx: &Arc<DeviceContext>, image_count: usize) -> RenderResult<Self> {
        let stride = transform_stride(ctx.limits().min_uniform_buffer_offset_alignment);
        let buffer = GpuBuffer::new(
            ctx,
            stride * image_count as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            HOST_VISIBLE,
        )?;
        debug!("vk: transform buffer {} x {} bytes", image_count, stride);
        Ok(Self {
            buffer,
            stride,
            slices: image_count,
        })
    }

    /// Overwrites the transforms read by the draw of `image_index`.
    pub fn write(&self, image_index: usize, transforms: &FrameTransforms) -> RenderResult<()> {
        debug_assert!(image_index < self.slices);
        self.buffer.write(self.offset(image_index), transforms.as_bytes())
    }

    #[inline]
    pub fn offset(&self, image_index: usize) -> vk::DeviceSize {
        self.stride * image_index as vk::DeviceSize
    }

    #[inline]
    pub fn slices(&self) -> usize {
        self.slices
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }
}

/// One descriptor set per swapchain image: its transform slice plus the
/// shared texture and sampler.
pub struct FrameDescriptors {
    ctx: Arc<DeviceContext>,
    pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
}

impl FrameDescriptors {
    pub fn new(
        ctx: &Arc<DeviceContext>,
        layout: &DescriptorSetLayout,
        transforms: &TransformBuffer,
        texture: &Texture,
        sampler: &Sampler,
    ) -> RenderResult<Self> {
        let device = ctx.device();
        let image_count = transforms.slices();
        let count = image_count as u32;

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: count,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: count,
            },
        ];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(count);
        let pool = unsafe { device.create_descriptor_pool(&pool_info, None)? };
        let mut this = Self {
            ctx: Arc::clone(ctx),
            pool,
            sets: Vec::new(),
        };

        let layouts = vec![layout.handle(); image_count];
        let alloc = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        this.sets = unsafe { device.allocate_descriptor_sets(&alloc)? };

        let image_info = vk::DescriptorImageInfo {
            sampler: sampler.handle(),
            image_view: texture.view(),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        for (i, &set) in this.sets.iter().enumerate() {
            let buffer_info = vk::DescriptorBufferInfo {
                buffer: transforms.handle(),
                offset: transforms.offset(i),
                range: TRANSFORMS_SIZE,
            };
            let writes = [
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(0)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(std::slice::from_ref(&buffer_info)),
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(1)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(std::slice::from_ref(&image_info)),
            ];
            unsafe { device.update_descriptor_sets(&writes, &[]) };
        }
        debug!("vk: {} descriptor sets written", image_count);
        Ok(this)
    }

    #[inline]
    pub fn set(&self, image_index: usize) -> vk::DescriptorSet {
        self.sets[image_index]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

impl Drop for FrameDescriptors {
    fn drop(&mut self) {
        // Sets are freed with the pool.
        unsafe { self.ctx.device().destroy_descriptor_pool(self.pool, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stride_respects_alignment() {
        assert_eq!(TRANSFORMS_SIZE, 192);
        assert_eq!(transform_stride(256), 256);
        assert_eq!(transform_stride(64), 192);
        assert_eq!(transform_stride(16), 192);
        assert_eq!(transform_stride(0), 192);
    }

    #[test]
    fn test_slices_do_not_overlap() {
        for align in [1u64, 16, 64, 128, 256] {
            let stride = transform_stride(align);
            assert!(stride >= TRANSFORMS_SIZE);
            assert_eq!(stride % align.max(1), 0);
        }
    }
}
