// SPDX-License-Identifier: CEPL-1.0
//! Sampled 2D textures with a full, blit-generated mip chain.

use ash::vk;
use ember_math::mip_levels;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::commands;
use crate::context::DeviceContext;
use crate::error::{RenderError, RenderResult};
use crate::memory::{GpuBuffer, GpuImage, ImageDesc, HOST_VISIBLE};

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;
const MAX_ANISOTROPY: f32 = 16.0;

/// Tightly packed RGBA8 pixels.
#[derive(Clone, Debug)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    pub fn open(path: &Path) -> RenderResult<Self> {
        let img = image::open(path).map_err(|source| RenderError::TextureLoad {
            path: path.to_path_buf(),
            source,
        })?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        debug!("decoded {:?}: {}x{}", path, width, height);
        Ok(Self {
            width,
            height,
            pixels: rgba.into_raw(),
        })
    }

    pub fn solid_color(width: u32, height: u32, color: [u8; 4]) -> Self {
        let pixels = color.repeat((width * height) as usize);
        Self { width, height, pixels }
    }

    pub fn mip_levels(&self) -> u32 {
        mip_levels(self.width, self.height)
    }

    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }
}

/// Size of every level of the chain, level 0 first. Each level halves the
/// previous one, never going below one texel.
pub fn mip_extents(width: u32, height: u32) -> Vec<(i32, i32)> {
    let mut w = width.max(1) as i32;
    let mut h = height.max(1) as i32;
    let mut out = Vec::with_capacity(mip_levels(width, height) as usize);
    for _ in 0..mip_levels(width, height) {
        out.push((w, h));
        w = (w / 2).max(1);
        h = (h / 2).max(1);
    }
    out
}

fn level_range(level: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: level,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn level_layers(level: u32) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: level,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Expects every level in TRANSFER_DST_OPTIMAL with level 0 filled; leaves
/// every level in SHADER_READ_ONLY_OPTIMAL.
fn generate_mipmaps(ctx: &DeviceContext, image: vk::Image, width: u32, height: u32) -> RenderResult<()> {
    let extents = mip_extents(width, height);
    commands::submit_one_shot(ctx, |d, cmd| {
        let mut barrier = vk::ImageMemoryBarrier::default()
            .image(image)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED);

        for (i, pair) in extents.windows(2).enumerate() {
            let (src_level, dst_level) = (i as u32, i as u32 + 1);
            let ((sw, sh), (dw, dh)) = (pair[0], pair[1]);

            // Level i was just written; make it the blit source.
            barrier.subresource_range = level_range(src_level);
            barrier.old_layout = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
            barrier.new_layout = vk::ImageLayout::TRANSFER_SRC_OPTIMAL;
            barrier.src_access_mask = vk::AccessFlags::TRANSFER_WRITE;
            barrier.dst_access_mask = vk::AccessFlags::TRANSFER_READ;
            unsafe {
                d.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    std::slice::from_ref(&barrier),
                );
            }

            let blit = vk::ImageBlit {
                src_subresource: level_layers(src_level),
                src_offsets: [vk::Offset3D { x: 0, y: 0, z: 0 }, vk::Offset3D { x: sw, y: sh, z: 1 }],
                dst_subresource: level_layers(dst_level),
                dst_offsets: [vk::Offset3D { x: 0, y: 0, z: 0 }, vk::Offset3D { x: dw, y: dh, z: 1 }],
            };
            unsafe {
                d.cmd_blit_image(
                    cmd,
                    image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    std::slice::from_ref(&blit),
                    vk::Filter::LINEAR,
                );
            }

            // Level i is final.
            barrier.old_layout = vk::ImageLayout::TRANSFER_SRC_OPTIMAL;
            barrier.new_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
            barrier.src_access_mask = vk::AccessFlags::TRANSFER_READ;
            barrier.dst_access_mask = vk::AccessFlags::SHADER_READ;
            unsafe {
                d.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    std::slice::from_ref(&barrier),
                );
            }
        }

        // The smallest level was only ever a blit destination.
        barrier.subresource_range = level_range(extents.len() as u32 - 1);
        barrier.old_layout = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
        barrier.new_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        barrier.src_access_mask = vk::AccessFlags::TRANSFER_WRITE;
        barrier.dst_access_mask = vk::AccessFlags::SHADER_READ;
        unsafe {
            d.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&barrier),
            );
        }
    })
}

pub struct Texture {
    image: GpuImage,
    extent: vk::Extent2D,
    mip_levels: u32,
}

impl Texture {
    pub fn load(ctx: &Arc<DeviceContext>, path: &Path) -> RenderResult<Self> {
        let _t = ember_core::ScopedTimer::new("load_texture");
        let decoded = DecodedImage::open(path)?;
        let texture = Self::upload(ctx, &decoded)?;
        info!(
            "texture {:?}: {}x{}, {} mip levels",
            path, decoded.width, decoded.height, texture.mip_levels
        );
        Ok(texture)
    }

    pub fn upload(ctx: &Arc<DeviceContext>, decoded: &DecodedImage) -> RenderResult<Self> {
        let features = ctx.format_properties(TEXTURE_FORMAT).optimal_tiling_features;
        if !features.contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR) {
            return Err(RenderError::LinearBlitUnsupported(TEXTURE_FORMAT));
        }

        let extent = decoded.extent();
        let mip_levels = decoded.mip_levels();
        let staging = GpuBuffer::staging(ctx, &decoded.pixels)?;
        let image = GpuImage::new(
            ctx,
            ImageDesc {
                extent,
                format: TEXTURE_FORMAT,
                mip_levels,
                usage: vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::SAMPLED,
                aspect: vk::ImageAspectFlags::COLOR,
            },
        )?;

        commands::transition_image_layout(
            ctx,
            image.image(),
            TEXTURE_FORMAT,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            mip_levels,
        )?;
        commands::copy_buffer_to_image(ctx, staging.handle(), image.image(), extent)?;
        generate_mipmaps(ctx, image.image(), extent.width, extent.height)?;

        Ok(Self {
            image,
            extent,
            mip_levels,
        })
    }

    /// Copies level 0 back to the host. The image returns to
    /// SHADER_READ_ONLY_OPTIMAL afterwards.
    pub fn read_back_level0(&self, ctx: &Arc<DeviceContext>) -> RenderResult<Vec<u8>> {
        let size = self.extent.width as vk::DeviceSize * self.extent.height as vk::DeviceSize * 4;
        let staging = GpuBuffer::new(ctx, size, vk::BufferUsageFlags::TRANSFER_DST, HOST_VISIBLE)?;
        commands::transition_image_layout(
            ctx,
            self.image.image(),
            TEXTURE_FORMAT,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            self.mip_levels,
        )?;
        commands::copy_image_to_buffer(ctx, self.image.image(), self.extent, staging.handle())?;
        commands::transition_image_layout(
            ctx,
            self.image.image(),
            TEXTURE_FORMAT,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            self.mip_levels,
        )?;
        staging.read()
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

pub struct Sampler {
    ctx: Arc<DeviceContext>,
    handle: vk::Sampler,
}

impl Sampler {
    /// Trilinear, repeating, anisotropic where the device allows it.
    pub fn new(ctx: &Arc<DeviceContext>, mip_levels: u32) -> RenderResult<Self> {
        let anisotropy = ctx.anisotropy_enabled;
        let info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(anisotropy)
            .max_anisotropy(if anisotropy {
                MAX_ANISOTROPY.min(ctx.limits().max_sampler_anisotropy)
            } else {
                1.0
            })
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(mip_levels as f32);
        let handle = unsafe { ctx.device().create_sampler(&info, None)? };
        Ok(Self {
            ctx: Arc::clone(ctx),
            handle,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Sampler {
        self.handle
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_sampler(self.handle, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_extents_halve_to_one() {
        let e = mip_extents(512, 256);
        assert_eq!(e.len(), 10);
        assert_eq!(e[0], (512, 256));
        assert_eq!(e[1], (256, 128));
        assert_eq!(e[8], (2, 1));
        assert_eq!(e[9], (1, 1));
    }

    #[test]
    fn test_mip_extents_odd_sizes() {
        let e = mip_extents(5, 3);
        assert_eq!(e, vec![(5, 3), (2, 1), (1, 1)]);
    }

    #[test]
    fn test_solid_color_image() {
        let img = DecodedImage::solid_color(4, 2, [255, 0, 0, 255]);
        assert_eq!(img.pixels.len(), 4 * 2 * 4);
        assert_eq!(&img.pixels[28..32], &[255, 0, 0, 255]);
        assert_eq!(img.mip_levels(), 3);
    }

    #[test]
    fn test_open_converts_to_rgba8() {
        let path = std::env::temp_dir().join(format!("ember-tex-{}.png", std::process::id()));
        let rgb = image::RgbImage::from_fn(3, 2, |x, y| image::Rgb([x as u8 * 10, y as u8 * 20, 7]));
        rgb.save(&path).unwrap();

        let decoded = DecodedImage::open(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!((decoded.width, decoded.height), (3, 2));
        assert_eq!(decoded.pixels.len(), 3 * 2 * 4);
        // Pixel (2, 1), alpha filled in.
        let px = &decoded.pixels[(3 + 2) * 4..(3 + 2) * 4 + 4];
        assert_eq!(px, &[20, 20, 7, 255]);
    }

    #[test]
    fn test_open_missing_file() {
        let err = DecodedImage::open(Path::new("no/such/texture.jpg")).unwrap_err();
        assert!(matches!(err, RenderError::TextureLoad { .. }));
    }
}
