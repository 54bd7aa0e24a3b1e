// SPDX-License-Identifier: CEPL-1.0
//! Render pass, depth buffer, descriptor layout, graphics pipeline and
//! framebuffers. Everything here except the descriptor layout is rebuilt
//! with the swapchain.

use ash::vk;
use std::ffi::CStr;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::commands;
use crate::context::DeviceContext;
use crate::error::{RenderError, RenderResult};
use crate::memory::{GpuImage, ImageDesc};
use crate::mesh::Vertex;
use crate::shader::ShaderModule;

const ENTRY_POINT: &CStr = c"main";

pub const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// First candidate whose optimal tiling supports depth-stencil attachments.
pub fn choose_depth_format(
    candidates: &[vk::Format],
    optimal_features: impl Fn(vk::Format) -> vk::FormatFeatureFlags,
) -> Option<vk::Format> {
    candidates
        .iter()
        .copied()
        .find(|&f| optimal_features(f).contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT))
}

pub fn pick_depth_format(ctx: &DeviceContext) -> RenderResult<vk::Format> {
    choose_depth_format(&DEPTH_CANDIDATES, |f| ctx.format_properties(f).optimal_tiling_features)
        .ok_or(RenderError::NoDepthFormat)
}

/// Depth attachment sized to the swapchain.
pub struct DepthBuffer {
    image: GpuImage,
}

impl DepthBuffer {
    pub fn new(ctx: &Arc<DeviceContext>, format: vk::Format, extent: vk::Extent2D) -> RenderResult<Self> {
        let image = GpuImage::new(
            ctx,
            ImageDesc {
                extent,
                format,
                mip_levels: 1,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                aspect: vk::ImageAspectFlags::DEPTH,
            },
        )?;
        commands::transition_image_layout(
            ctx,
            image.image(),
            format,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            1,
        )?;
        Ok(Self { image })
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }
}

pub struct RenderPass {
    ctx: Arc<DeviceContext>,
    handle: vk::RenderPass,
}

impl RenderPass {
    /// One subpass: color cleared and presented, depth cleared and discarded.
    pub fn new(ctx: &Arc<DeviceContext>, color_format: vk::Format, depth_format: vk::Format) -> RenderResult<Self> {
        let attachments = [
            vk::AttachmentDescription {
                format: color_format,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::STORE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
                ..Default::default()
            },
            vk::AttachmentDescription {
                format: depth_format,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::DONT_CARE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                ..Default::default()
            },
        ];
        let color_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(std::slice::from_ref(&color_ref))
            .depth_stencil_attachment(&depth_ref);
        let dependency = vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            src_access_mask: vk::AccessFlags::empty(),
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ..Default::default()
        };
        let info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(std::slice::from_ref(&subpass))
            .dependencies(std::slice::from_ref(&dependency));

        let handle = unsafe { ctx.device().create_render_pass(&info, None)? };
        Ok(Self {
            ctx: Arc::clone(ctx),
            handle,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::RenderPass {
        self.handle
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_render_pass(self.handle, None) };
    }
}

/// Set 0: binding 0 transforms (vertex), binding 1 texture + sampler (fragment).
pub struct DescriptorSetLayout {
    ctx: Arc<DeviceContext>,
    handle: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    pub fn new(ctx: &Arc<DeviceContext>) -> RenderResult<Self> {
        let bindings = [
            vk::DescriptorSetLayoutBinding {
                binding: 0,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: 1,
                stage_flags: vk::ShaderStageFlags::VERTEX,
                ..Default::default()
            },
            vk::DescriptorSetLayoutBinding {
                binding: 1,
                descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: 1,
                stage_flags: vk::ShaderStageFlags::FRAGMENT,
                ..Default::default()
            },
        ];
        let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let handle = unsafe { ctx.device().create_descriptor_set_layout(&info, None)? };
        Ok(Self {
            ctx: Arc::clone(ctx),
            handle,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.handle
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_descriptor_set_layout(self.handle, None) };
    }
}

/// Pipeline and its layout; the pipeline goes first on drop.
pub struct GraphicsPipeline {
    ctx: Arc<DeviceContext>,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    pub fn new(
        ctx: &Arc<DeviceContext>,
        render_pass: &RenderPass,
        set_layout: &DescriptorSetLayout,
        extent: vk::Extent2D,
        vertex_shader: &Path,
        fragment_shader: &Path,
    ) -> RenderResult<Self> {
        let device = ctx.device();
        let vert = ShaderModule::from_file(ctx, vertex_shader)?;
        let frag = ShaderModule::from_file(ctx, fragment_shader)?;

        let set_layouts = [set_layout.handle()];
        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        let layout = unsafe { device.create_pipeline_layout(&layout_info, None)? };
        let mut this = Self {
            ctx: Arc::clone(ctx),
            pipeline: vk::Pipeline::null(),
            layout,
        };

        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert.handle())
                .name(ENTRY_POINT),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag.handle())
                .name(ENTRY_POINT),
        ];

        let bindings = [Vertex::binding_description()];
        let attributes = Vertex::attribute_descriptions();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        }];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let raster = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let depth = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let blend_attachments = [vk::PipelineColorBlendAttachmentState {
            blend_enable: vk::FALSE,
            color_write_mask: vk::ColorComponentFlags::RGBA,
            ..Default::default()
        }];
        let blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&raster)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth)
            .color_blend_state(&blend)
            .layout(layout)
            .render_pass(render_pass.handle())
            .subpass(0);

        let pipelines = unsafe {
            device
                .create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&info), None)
                .map_err(|(_, e)| e)?
        };
        this.pipeline = pipelines[0];
        debug!("vk: graphics pipeline built for {}x{}", extent.width, extent.height);
        Ok(this)
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            let d = self.ctx.device();
            if self.pipeline != vk::Pipeline::null() {
                d.destroy_pipeline(self.pipeline, None);
            }
            d.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// One framebuffer per swapchain view, all sharing the depth view.
pub struct Framebuffers {
    ctx: Arc<DeviceContext>,
    handles: Vec<vk::Framebuffer>,
}

impl Framebuffers {
    pub fn new(
        ctx: &Arc<DeviceContext>,
        render_pass: &RenderPass,
        color_views: &[vk::ImageView],
        depth_view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> RenderResult<Self> {
        let mut this = Self {
            ctx: Arc::clone(ctx),
            handles: Vec::with_capacity(color_views.len()),
        };
        for &view in color_views {
            let attachments = [view, depth_view];
            let info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass.handle())
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            this.handles.push(unsafe { ctx.device().create_framebuffer(&info, None)? });
        }
        Ok(this)
    }

    pub fn get(&self, index: usize) -> vk::Framebuffer {
        self.handles[index]
    }
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        unsafe {
            let d = self.ctx.device();
            for &fb in &self.handles {
                d.destroy_framebuffer(fb, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supports(formats: &'static [vk::Format]) -> impl Fn(vk::Format) -> vk::FormatFeatureFlags {
        move |f| {
            if formats.contains(&f) {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::empty()
            }
        }
    }

    #[test]
    fn test_depth_format_prefers_d32() {
        let all = supports(&[vk::Format::D24_UNORM_S8_UINT, vk::Format::D32_SFLOAT]);
        assert_eq!(choose_depth_format(&DEPTH_CANDIDATES, all), Some(vk::Format::D32_SFLOAT));
    }

    #[test]
    fn test_depth_format_falls_back() {
        let only_d24 = supports(&[vk::Format::D24_UNORM_S8_UINT]);
        assert_eq!(
            choose_depth_format(&DEPTH_CANDIDATES, only_d24),
            Some(vk::Format::D24_UNORM_S8_UINT)
        );
        assert_eq!(choose_depth_format(&DEPTH_CANDIDATES, supports(&[])), None);
    }
}
