// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: device bring-up, swapchain lifetime, frames in flight and
//! the mesh/texture uploads behind the demo scene.

#![deny(unsafe_op_in_unsafe_fn)]

mod chain;
mod commands;
mod context;
mod descriptors;
mod device;
mod error;
mod frame;
mod init;
mod memory;
mod mesh;
mod pipeline;
mod renderer;
mod shader;
mod surface;
mod swapchain;
mod texture;

use std::path::PathBuf;

pub use context::{DeviceContext, InstanceContext};
pub use device::{select_device, DeviceCandidate, QueueFamilyIndices, Unsuitable};
pub use error::{RenderError, RenderResult};
pub use frame::{FrameRing, ResizeState, SlotFence, SlotPhase, SubmitFailurePolicy, MAX_FRAMES_IN_FLIGHT};
pub use init::InitStep;
pub use memory::{GpuBuffer, GpuImage, ImageDesc};
pub use mesh::{load_obj, Mesh, MeshData, Vertex};
pub use renderer::VkRenderer;
pub use surface::{PresentationTarget, Surface};
pub use texture::{DecodedImage, Sampler, Texture, TEXTURE_FORMAT};

pub const VERTEX_SHADER_FILE: &str = "mesh.vert.spv";
pub const FRAGMENT_SHADER_FILE: &str = "mesh.frag.spv";

/// Directory holding the SPIR-V compiled by this crate's build script.
pub fn default_shader_dir() -> PathBuf {
    PathBuf::from(env!("EMBER_SHADER_DIR"))
}
