// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no suitable physical device among {inspected} candidate(s)")]
    NoSuitableDevice { inspected: usize },

    #[error("failed to load model {path:?}: {source}")]
    ModelLoad {
        path: PathBuf,
        #[source]
        source: tobj::LoadError,
    },

    #[error("model {path:?} is unusable: {reason}")]
    InvalidModel { path: PathBuf, reason: String },

    #[error("GPU allocation of {size} bytes failed: {result}")]
    BufferAllocation { size: vk::DeviceSize, result: vk::Result },

    #[error("no memory type matches bits {type_bits:#x} with {flags:?}")]
    NoCompatibleMemoryType {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },

    #[error("failed to load texture {path:?}: {source}")]
    TextureLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("format {0:?} does not support linear blits, cannot build mip chain")]
    LinearBlitUnsupported(vk::Format),

    #[error("failed to load shader {path:?}: {source}")]
    ShaderLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no supported depth format")]
    NoDepthFormat,

    #[error("unsupported layout transition {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    #[error("instance extensions not available: {}", .0.join(", "))]
    MissingInstanceExtensions(Vec<String>),

    #[error("no presentation chain, the last rebuild failed")]
    NoPresentationChain,

    #[error("{consecutive} consecutive queue submissions failed, last: {last}")]
    SubmitFailures { consecutive: u32, last: vk::Result },

    #[error("vulkan: {0}")]
    Vulkan(#[from] vk::Result),

    #[error("vulkan loader: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("window handle: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),
}

pub type RenderResult<T> = std::result::Result<T, RenderError>;
