// SPDX-License-Identifier: CEPL-1.0
//! Everything that depends on the swapchain extent. Rebuilt as a whole on
//! resize: once the device is idle the old chain is destroyed, framebuffers
//! first and swapchain last, and only then is the new one built.

use anyhow::{Context, Result};
use ash::vk;
use ember_render::{AssetPaths, RenderSize};
use std::sync::Arc;
use tracing::info;

use crate::context::DeviceContext;
use crate::descriptors::FrameDescriptors;
use crate::error::RenderResult;
use crate::init::InitStep;
use crate::mesh::Mesh;
use crate::pipeline::{pick_depth_format, DepthBuffer, DescriptorSetLayout, Framebuffers, GraphicsPipeline, RenderPass};
use crate::surface::Surface;
use crate::swapchain::Swapchain;

/// Clear values for the color and depth attachments.
pub fn clear_values(rgba: [f32; 4]) -> [vk::ClearValue; 2] {
    [
        vk::ClearValue {
            color: vk::ClearColorValue { float32: rgba },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
        },
    ]
}

/// Prerecorded draw commands, one buffer per swapchain image.
pub struct CommandBuffers {
    ctx: Arc<DeviceContext>,
    handles: Vec<vk::CommandBuffer>,
}

impl CommandBuffers {
    pub fn allocate(ctx: &Arc<DeviceContext>, count: usize) -> RenderResult<Self> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(ctx.command_pool())
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count as u32);
        let handles = unsafe { ctx.device().allocate_command_buffers(&info)? };
        Ok(Self {
            ctx: Arc::clone(ctx),
            handles,
        })
    }

    #[inline]
    pub fn get(&self, index: usize) -> vk::CommandBuffer {
        self.handles[index]
    }
}

impl Drop for CommandBuffers {
    fn drop(&mut self) {
        unsafe {
            self.ctx
                .device()
                .free_command_buffers(self.ctx.command_pool(), &self.handles)
        };
    }
}

/// Drops the value in `slot` before building its replacement, so the two
/// never coexist. A failed build leaves the slot empty.
pub fn rebuild_after_drop<T, E>(slot: &mut Option<T>, build: impl FnOnce() -> Result<T, E>) -> Result<&mut T, E> {
    drop(slot.take());
    Ok(slot.insert(build()?))
}

pub struct PresentationChain {
    // Drop order follows the teardown order of the chain.
    framebuffers: Framebuffers,
    commands: CommandBuffers,
    pipeline: GraphicsPipeline,
    render_pass: RenderPass,
    depth: DepthBuffer,
    swapchain: Swapchain,
    ctx: Arc<DeviceContext>,
}

impl PresentationChain {
    pub fn build(
        ctx: &Arc<DeviceContext>,
        surface: &Surface,
        size: RenderSize,
        set_layout: &DescriptorSetLayout,
        assets: &AssetPaths,
    ) -> Result<Self> {
        let mut swapchain = Swapchain::new(ctx, surface, size).context(InitStep::CreateSwapchain)?;
        swapchain.create_views().context(InitStep::CreateImageViews)?;

        let depth_format = pick_depth_format(ctx).context(InitStep::CreateRenderPass)?;
        let render_pass =
            RenderPass::new(ctx, swapchain.format.format, depth_format).context(InitStep::CreateRenderPass)?;
        let pipeline = GraphicsPipeline::new(
            ctx,
            &render_pass,
            set_layout,
            swapchain.extent,
            &assets.vertex_shader,
            &assets.fragment_shader,
        )
        .context(InitStep::CreateGraphicsPipeline)?;
        let depth = DepthBuffer::new(ctx, depth_format, swapchain.extent).context(InitStep::CreateDepthResources)?;
        let framebuffers = Framebuffers::new(ctx, &render_pass, swapchain.views(), depth.view(), swapchain.extent)
            .context(InitStep::CreateFramebuffers)?;
        let commands =
            CommandBuffers::allocate(ctx, swapchain.image_count()).context(InitStep::RecordCommandBuffers)?;

        Ok(Self {
            framebuffers,
            commands,
            pipeline,
            render_pass,
            depth,
            swapchain,
            ctx: Arc::clone(ctx),
        })
    }

    /// Records one command buffer per image drawing `mesh` with the image's
    /// descriptor set. Re-recording happens in place, so none of the buffers
    /// may be pending on the GPU.
    pub fn record(&self, descriptors: &FrameDescriptors, mesh: &Mesh, clear: [f32; 4]) -> RenderResult<()> {
        let count = self.swapchain.image_count();
        let commands = &self.commands;
        let device = self.ctx.device();
        let clears = clear_values(clear);
        let extent = self.swapchain.extent;

        for i in 0..count {
            let cmd = commands.get(i);
            let begin = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);
            let rp_begin = vk::RenderPassBeginInfo::default()
                .render_pass(self.render_pass.handle())
                .framebuffer(self.framebuffers.get(i))
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                })
                .clear_values(&clears);
            unsafe {
                device.begin_command_buffer(cmd, &begin)?;
                device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
                device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.handle());
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.pipeline.layout(),
                    0,
                    &[descriptors.set(i)],
                    &[],
                );
                mesh.record_draw(device, cmd);
                device.cmd_end_render_pass(cmd);
                device.end_command_buffer(cmd)?;
            }
        }
        info!("vk: recorded {} command buffers", count);
        Ok(())
    }

    #[inline]
    pub fn command_buffer(&self, image_index: usize) -> vk::CommandBuffer {
        self.commands.get(image_index)
    }

    #[inline]
    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    #[inline]
    pub fn aspect(&self) -> f32 {
        let e = self.swapchain.extent;
        e.width as f32 / e.height.max(1) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Tracked {
        name: &'static str,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.log.borrow_mut().push(format!("drop {}", self.name));
        }
    }

    #[test]
    fn test_rebuild_drops_old_before_building() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut slot = Some(Tracked {
            name: "old",
            log: Rc::clone(&log),
        });
        let built = rebuild_after_drop(&mut slot, || {
            log.borrow_mut().push("build new".to_owned());
            Ok::<_, ()>(Tracked {
                name: "new",
                log: Rc::clone(&log),
            })
        })
        .unwrap();
        assert_eq!(built.name, "new");
        assert_eq!(*log.borrow(), vec!["drop old", "build new"]);
    }

    #[test]
    fn test_failed_rebuild_leaves_slot_empty() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut slot = Some(Tracked {
            name: "old",
            log: Rc::clone(&log),
        });
        let result = rebuild_after_drop(&mut slot, || Err::<Tracked, _>("no surface"));
        assert_eq!(result.err(), Some("no surface"));
        assert!(slot.is_none());
        assert_eq!(*log.borrow(), vec!["drop old"]);
    }

    #[test]
    fn test_clear_values() {
        let [color, depth] = clear_values([0.1, 0.2, 0.3, 1.0]);
        unsafe {
            assert_eq!(color.color.float32, [0.1, 0.2, 0.3, 1.0]);
            assert_eq!(depth.depth_stencil.depth, 1.0);
            assert_eq!(depth.depth_stencil.stencil, 0);
        }
    }
}
