// SPDX-License-Identifier: CEPL-1.0
//! One-shot command submission and the layout transitions built on it.
//! Every helper here blocks until the graphics queue drains; use at load time only.

use ash::vk;

use crate::context::DeviceContext;
use crate::error::{RenderError, RenderResult};

/// Records `record` into a temporary command buffer, submits it to the
/// graphics queue and waits for the queue to go idle.
pub fn submit_one_shot<F>(ctx: &DeviceContext, record: F) -> RenderResult<()>
where
    F: FnOnce(&ash::Device, vk::CommandBuffer),
{
    let device = ctx.device();
    let ai = vk::CommandBufferAllocateInfo::default()
        .command_pool(ctx.command_pool())
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);
    let cmd = unsafe { device.allocate_command_buffers(&ai)? }[0];

    let result = (|| -> RenderResult<()> {
        let bi = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(cmd, &bi)? };
        record(device, cmd);
        unsafe { device.end_command_buffer(cmd)? };

        let si = vk::SubmitInfo::default().command_buffers(std::slice::from_ref(&cmd));
        unsafe {
            device.queue_submit(ctx.graphics_queue, std::slice::from_ref(&si), vk::Fence::null())?;
            device.queue_wait_idle(ctx.graphics_queue)?;
        }
        Ok(())
    })();

    unsafe { device.free_command_buffers(ctx.command_pool(), std::slice::from_ref(&cmd)) };
    result
}

pub fn copy_buffer(ctx: &DeviceContext, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) -> RenderResult<()> {
    submit_one_shot(ctx, |d, cmd| {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe { d.cmd_copy_buffer(cmd, src, dst, std::slice::from_ref(&region)) };
    })
}

fn color_level(mip_level: u32) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn full_image_copy(extent: vk::Extent2D) -> vk::BufferImageCopy {
    vk::BufferImageCopy {
        buffer_offset: 0,
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: color_level(0),
        image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
        image_extent: vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        },
    }
}

/// Copies tightly packed pixels into mip 0; the image must be in TRANSFER_DST_OPTIMAL.
pub fn copy_buffer_to_image(
    ctx: &DeviceContext,
    buffer: vk::Buffer,
    image: vk::Image,
    extent: vk::Extent2D,
) -> RenderResult<()> {
    submit_one_shot(ctx, |d, cmd| {
        let region = full_image_copy(extent);
        unsafe {
            d.cmd_copy_buffer_to_image(
                cmd,
                buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            )
        };
    })
}

/// Copies mip 0 into `buffer`; the image must be in TRANSFER_SRC_OPTIMAL.
pub fn copy_image_to_buffer(
    ctx: &DeviceContext,
    image: vk::Image,
    extent: vk::Extent2D,
    buffer: vk::Buffer,
) -> RenderResult<()> {
    submit_one_shot(ctx, |d, cmd| {
        let region = full_image_copy(extent);
        unsafe {
            d.cmd_copy_image_to_buffer(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                buffer,
                std::slice::from_ref(&region),
            )
        };
    })
}

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(format, vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT)
}

pub fn aspect_for(format: vk::Format, new_layout: vk::ImageLayout) -> vk::ImageAspectFlags {
    if new_layout == vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL {
        if has_stencil(format) {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        }
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Access and stage masks for the transitions the loaders perform.
pub fn transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> Option<TransitionMasks> {
    use vk::{AccessFlags as A, ImageLayout as L, PipelineStageFlags as S};
    let masks = match (old, new) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => (A::empty(), A::TRANSFER_WRITE, S::TOP_OF_PIPE, S::TRANSFER),
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => {
            (A::TRANSFER_WRITE, A::SHADER_READ, S::TRANSFER, S::FRAGMENT_SHADER)
        }
        (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => (
            A::empty(),
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            S::TOP_OF_PIPE,
            S::EARLY_FRAGMENT_TESTS,
        ),
        (L::SHADER_READ_ONLY_OPTIMAL, L::TRANSFER_SRC_OPTIMAL) => {
            (A::SHADER_READ, A::TRANSFER_READ, S::FRAGMENT_SHADER, S::TRANSFER)
        }
        (L::TRANSFER_SRC_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => {
            (A::TRANSFER_READ, A::SHADER_READ, S::TRANSFER, S::FRAGMENT_SHADER)
        }
        _ => return None,
    };
    Some(TransitionMasks {
        src_access: masks.0,
        dst_access: masks.1,
        src_stage: masks.2,
        dst_stage: masks.3,
    })
}

/// Moves every mip of `image` from `old` to `new`.
pub fn transition_image_layout(
    ctx: &DeviceContext,
    image: vk::Image,
    format: vk::Format,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
    mip_levels: u32,
) -> RenderResult<()> {
    let masks = transition_masks(old, new).ok_or(RenderError::UnsupportedLayoutTransition { old, new })?;
    submit_one_shot(ctx, |d, cmd| {
        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(old)
            .new_layout(new)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect_for(format, new),
                base_mip_level: 0,
                level_count: mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            })
            .src_access_mask(masks.src_access)
            .dst_access_mask(masks.dst_access);
        unsafe {
            d.cmd_pipeline_barrier(
                cmd,
                masks.src_stage,
                masks.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&barrier),
            )
        };
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_transitions_are_ordered() {
        let to_dst = transition_masks(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL).unwrap();
        assert_eq!(to_dst.src_access, vk::AccessFlags::empty());
        assert_eq!(to_dst.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_dst.dst_stage, vk::PipelineStageFlags::TRANSFER);

        let to_read = transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(to_read.src_stage, to_dst.dst_stage);
        assert_eq!(to_read.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn test_depth_transition() {
        let m = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )
        .unwrap();
        assert_eq!(m.dst_stage, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS);
        assert!(m.dst_access.contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
    }

    #[test]
    fn test_unsupported_transition() {
        assert_eq!(
            transition_masks(vk::ImageLayout::PRESENT_SRC_KHR, vk::ImageLayout::UNDEFINED),
            None
        );
    }

    #[test]
    fn test_aspect_adds_stencil_for_stencil_formats() {
        let layout = vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL;
        assert_eq!(aspect_for(vk::Format::D32_SFLOAT, layout), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            aspect_for(vk::Format::D24_UNORM_S8_UINT, layout),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            aspect_for(vk::Format::R8G8B8A8_UNORM, vk::ImageLayout::TRANSFER_DST_OPTIMAL),
            vk::ImageAspectFlags::COLOR
        );
    }
}
