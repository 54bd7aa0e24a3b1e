// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::vk;
use ember_core::ScopedTimer;
use ember_math::{rotation_angle, FrameTransforms};
use ember_render::{RenderSettings, RenderSize, RenderWindow, Renderer};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::chain::{rebuild_after_drop, PresentationChain};
use crate::context::{DeviceContext, InstanceContext};
use crate::descriptors::{FrameDescriptors, TransformBuffer};
use crate::error::{RenderError, RenderResult};
use crate::frame::{FrameRing, FrameSlot, ResizeState, SubmitFailurePolicy};
use crate::init::InitStep;
use crate::mesh::Mesh;
use crate::pipeline::DescriptorSetLayout;
use crate::surface::{PresentationTarget, Surface};
use crate::texture::{Sampler, Texture};

/// Model angle used when rotation is switched off.
const FIXED_ANGLE_DEGREES: f32 = 90.0;

/// Clear color until the driver sets one.
const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

pub struct VkRenderer {
    // Fields drop top to bottom: everything built on the device goes before
    // the device, the device before the surface and instance.
    frames: FrameRing<FrameSlot>,
    descriptors: FrameDescriptors,
    transforms: TransformBuffer,
    mesh: Mesh,
    sampler: Sampler,
    texture: Texture,
    // None while a rebuild is in progress or after one failed.
    chain: Option<PresentationChain>,
    set_layout: DescriptorSetLayout,
    ctx: Arc<DeviceContext>,
    surface: Surface,
    _instance: Arc<InstanceContext>,

    settings: RenderSettings,
    resize: ResizeState,
    submit_policy: SubmitFailurePolicy,
    started: Instant,
    clear_color: [f32; 4],
}

impl VkRenderer {
    fn chain(&self) -> RenderResult<&PresentationChain> {
        self.chain.as_ref().ok_or(RenderError::NoPresentationChain)
    }

    fn transforms_for_now(&self, aspect: f32) -> FrameTransforms {
        let angle = if self.settings.rotate {
            rotation_angle(self.started.elapsed().as_secs_f32(), self.settings.degrees_per_second)
        } else {
            FIXED_ANGLE_DEGREES.to_radians()
        };
        FrameTransforms::new(angle, aspect)
    }

    /// Tears down everything that depends on the swapchain, then rebuilds it
    /// at `size`.
    fn recreate(&mut self, size: RenderSize) -> Result<()> {
        let _t = ScopedTimer::new("recreate_swapchain");
        self.ctx.wait_idle()?;

        let chain = rebuild_after_drop(&mut self.chain, || {
            PresentationChain::build(&self.ctx, &self.surface, size, &self.set_layout, &self.settings.assets)
        })?;

        let image_count = chain.image_count();
        if image_count != self.descriptors.len() {
            debug!("vk: image count changed to {image_count}, rebuilding descriptors");
            self.transforms = TransformBuffer::new(&self.ctx, image_count).context(InitStep::CreateTransformBuffer)?;
            self.descriptors = FrameDescriptors::new(
                &self.ctx,
                &self.set_layout,
                &self.transforms,
                &self.texture,
                &self.sampler,
            )
            .context(InitStep::CreateDescriptorSets)?;
        }
        chain
            .record(&self.descriptors, &self.mesh, self.clear_color)
            .context(InitStep::RecordCommandBuffers)?;
        self.frames.reset_image_owners(image_count);

        let e = chain.extent();
        info!("vk: swapchain recreated at {}x{}", e.width, e.height);
        Ok(())
    }

    fn recreate_if_ready(&mut self) -> Result<()> {
        if let Some(size) = self.resize.take_ready() {
            self.recreate(size)?;
        }
        Ok(())
    }

    fn draw_frame(&mut self) -> Result<()> {
        self.recreate_if_ready()?;
        if self.resize.is_paused() {
            return Ok(());
        }

        self.frames.begin()?;
        let acquired = self.chain()?.swapchain().acquire(self.frames.current().image_acquired);
        let image_index = match acquired {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    self.resize.mark_out_of_date();
                }
                index
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.frames.abort();
                self.resize.mark_out_of_date();
                return self.recreate_if_ready();
            }
            Err(e) => return Err(RenderError::from(e).into()),
        };
        let image = image_index as usize;

        self.frames.claim_image(image)?;
        self.frames.arm()?;
        let transforms = self.transforms_for_now(self.chain()?.aspect());
        self.transforms.write(image, &transforms)?;

        let slot = self.frames.current();
        let wait_semaphores = [slot.image_acquired];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [slot.render_finished];
        let command_buffers = [self.chain()?.command_buffer(image)];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        let submitted = unsafe {
            self.ctx
                .device()
                .queue_submit(self.ctx.graphics_queue, std::slice::from_ref(&submit), slot.in_flight)
        };
        if let Err(result) = submitted {
            // The armed fence will never signal; give the slot fresh objects.
            self.ctx.wait_idle()?;
            let fresh = FrameSlot::new(&self.ctx)?;
            drop(self.frames.replace_current(fresh));
            self.submit_policy.record_lost_frame(result, &mut self.resize)?;
            return Ok(());
        }
        self.submit_policy.record_success();
        self.frames.submitted();

        let presented = self
            .chain()?
            .swapchain()
            .present(self.ctx.present_queue, signal_semaphores[0], image_index);
        self.frames.presented();
        match presented {
            Ok(false) => {}
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => self.resize.mark_out_of_date(),
            Err(e) => return Err(RenderError::from(e).into()),
        }
        self.recreate_if_ready()
    }
}

impl Renderer for VkRenderer {
    fn new(window: &dyn RenderWindow, settings: &RenderSettings) -> Result<Self> {
        let _t = ScopedTimer::new("renderer_init");
        let extensions = window
            .required_surface_extensions()
            .context(InitStep::CreateInstance)?;
        let instance = InstanceContext::new(extensions, settings.validation)?;
        let surface = window.create_surface(&instance).context(InitStep::CreateSurface)?;
        let ctx = DeviceContext::new(&instance, &surface)?;

        let set_layout = DescriptorSetLayout::new(&ctx).context(InitStep::CreateDescriptorSetLayout)?;
        let size = window.size();
        let chain = PresentationChain::build(&ctx, &surface, size, &set_layout, &settings.assets)?;

        let texture = Texture::load(&ctx, &settings.assets.texture).context(InitStep::LoadTexture)?;
        let sampler = Sampler::new(&ctx, texture.mip_levels()).context(InitStep::CreateSampler)?;
        let mesh = Mesh::load(&ctx, &settings.assets.model).context(InitStep::LoadModel)?;

        let transforms =
            TransformBuffer::new(&ctx, chain.image_count()).context(InitStep::CreateTransformBuffer)?;
        let descriptors = FrameDescriptors::new(&ctx, &set_layout, &transforms, &texture, &sampler)
            .context(InitStep::CreateDescriptorSets)?;
        chain
            .record(&descriptors, &mesh, DEFAULT_CLEAR_COLOR)
            .context(InitStep::RecordCommandBuffers)?;

        let mut frames = FrameSlot::ring(&ctx).context(InitStep::CreateSyncObjects)?;
        frames.reset_image_owners(chain.image_count());

        let e = chain.extent();
        info!(
            "vk: renderer ready ({}x{}, {} images, {} indices)",
            e.width,
            e.height,
            chain.image_count(),
            mesh.index_count()
        );

        Ok(Self {
            frames,
            descriptors,
            transforms,
            mesh,
            sampler,
            texture,
            chain: Some(chain),
            set_layout,
            ctx,
            surface,
            _instance: instance,
            settings: settings.clone(),
            resize: ResizeState::new(size),
            submit_policy: SubmitFailurePolicy::new(settings.max_consecutive_submit_failures),
            started: Instant::now(),
            clear_color: DEFAULT_CLEAR_COLOR,
        })
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        self.resize.request(size);
        if self.resize.is_paused() {
            debug!("vk: window has no area, rebuild deferred");
        }
        self.recreate_if_ready()
    }

    fn render(&mut self) -> Result<()> {
        self.draw_frame()
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) -> Result<()> {
        self.ctx.wait_idle()?;
        self.clear_color = rgba;
        self.chain()?.record(&self.descriptors, &self.mesh, rgba)?;
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.ctx.wait_idle()?;
        Ok(())
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        // Nothing may be destroyed while the GPU still uses it.
        if let Err(e) = self.ctx.wait_idle() {
            warn!("vk: wait_idle on shutdown failed: {e}");
        }
    }
}
