// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True while the window is minimised; nothing can be presented.
    pub fn is_zero_area(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

/// Asset locations read once at renderer creation.
#[derive(Clone, Debug)]
pub struct AssetPaths {
    pub model: PathBuf,
    pub texture: PathBuf,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
}

#[derive(Clone, Debug)]
pub struct RenderSettings {
    pub assets: AssetPaths,
    /// Spin the model about +Z over time; when off it stays at a fixed angle.
    pub rotate: bool,
    pub degrees_per_second: f32,
    pub validation: bool,
    pub max_consecutive_submit_failures: u32,
}

/// What a renderer needs from the native window: its handles, its current
/// pixel size and an event pump.
pub trait RenderWindow: HasWindowHandle + HasDisplayHandle {
    fn size(&self) -> RenderSize;
    fn should_close(&self) -> bool;
    fn pump_events(&mut self);
    /// Per-frame housekeeping after events were pumped.
    fn update(&mut self) {}
    /// Returns the latest size if the window was resized since the last call.
    fn take_resize(&mut self) -> Option<RenderSize>;
}

pub trait Renderer {
    fn new(window: &dyn RenderWindow, settings: &RenderSettings) -> Result<Self>
    where
        Self: Sized;
    fn resize(&mut self, size: RenderSize) -> Result<()>;
    fn render(&mut self) -> Result<()>;
    /// Re-records the draw commands with a new background color.
    fn set_clear_color(&mut self, rgba: [f32; 4]) -> Result<()>;
    /// Blocks until the GPU has finished all submitted work.
    fn wait_idle(&mut self) -> Result<()>;
}
