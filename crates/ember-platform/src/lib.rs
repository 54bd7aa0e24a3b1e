// SPDX-License-Identifier: CEPL-1.0
//! winit-backed window that is driven by explicit event pumping instead of
//! handing control to `EventLoop::run_app`.

use anyhow::{bail, Context, Result};
use ember_render::{RenderSize, RenderWindow};
use raw_window_handle::{DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle};
use std::time::Duration;
use tracing::{debug, error, info};
use winit::{
    application::ApplicationHandler,
    dpi::{LogicalSize, PhysicalSize},
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Window, WindowId},
};

pub use winit;

const STARTUP_PUMPS: usize = 200;
const STARTUP_PUMP_TIMEOUT: Duration = Duration::from_millis(10);
const MINIMISED_PUMP_TIMEOUT: Duration = Duration::from_millis(16);

#[derive(Clone, Debug)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Engine".to_owned(),
            width: 1000,
            height: 750,
        }
    }
}

struct WindowState {
    config: WindowConfig,
    window: Option<Window>,
    size: RenderSize,
    pending_resize: Option<RenderSize>,
    close_requested: bool,
    create_error: Option<String>,
}

impl WindowState {
    fn new(config: WindowConfig) -> Self {
        let size = RenderSize::new(config.width, config.height);
        Self {
            config,
            window: None,
            size,
            pending_resize: None,
            close_requested: false,
            create_error: None,
        }
    }

    fn record_resize(&mut self, size: RenderSize) {
        if size != self.size || self.pending_resize.is_some() {
            self.pending_resize = Some(size);
        }
        self.size = size;
    }
}

fn render_size(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize::new(size.width, size.height)
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(LogicalSize::new(self.config.width, self.config.height));
        match event_loop.create_window(attrs) {
            Ok(window) => {
                self.size = render_size(window.inner_size());
                info!(
                    "window \"{}\" created at {}x{}",
                    self.config.title, self.size.width, self.size.height
                );
                self.window = Some(window);
            }
            Err(e) => {
                error!("create_window failed: {e}");
                self.create_error = Some(e.to_string());
                self.close_requested = true;
            }
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.close_requested = true;
            }
            WindowEvent::Resized(new_size) => {
                let size = render_size(new_size);
                debug!("resized -> {}x{}", size.width, size.height);
                self.record_resize(size);
            }
            _ => {}
        }
    }
}

pub struct WinitWindow {
    // Field order: the window must go before its event loop.
    state: WindowState,
    event_loop: EventLoop<()>,
}

impl WinitWindow {
    /// Creates the event loop and pumps it until the native window exists.
    pub fn new(config: WindowConfig) -> Result<Self> {
        let event_loop = EventLoop::new().context("create event loop")?;
        let mut this = Self {
            state: WindowState::new(config),
            event_loop,
        };

        for _ in 0..STARTUP_PUMPS {
            this.pump(Some(STARTUP_PUMP_TIMEOUT));
            if let Some(err) = this.state.create_error.take() {
                bail!("create window: {err}");
            }
            if this.state.window.is_some() {
                // The initial size is not a resize.
                this.state.pending_resize = None;
                return Ok(this);
            }
        }
        bail!("window was not created after {STARTUP_PUMPS} event pumps")
    }

    pub fn window(&self) -> Option<&Window> {
        self.state.window.as_ref()
    }

    fn pump(&mut self, timeout: Option<Duration>) {
        if let PumpStatus::Exit(code) = self.event_loop.pump_app_events(timeout, &mut self.state) {
            debug!("event loop exited with code {code}");
            self.state.close_requested = true;
        }
    }
}

impl RenderWindow for WinitWindow {
    fn size(&self) -> RenderSize {
        self.state.size
    }

    fn should_close(&self) -> bool {
        self.state.close_requested
    }

    fn pump_events(&mut self) {
        let timeout = if self.state.size.is_zero_area() {
            MINIMISED_PUMP_TIMEOUT
        } else {
            Duration::ZERO
        };
        self.pump(Some(timeout));
    }

    fn take_resize(&mut self) -> Option<RenderSize> {
        self.state.pending_resize.take()
    }
}

impl HasWindowHandle for WinitWindow {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.state
            .window
            .as_ref()
            .ok_or(HandleError::Unavailable)?
            .window_handle()
    }
}

impl HasDisplayHandle for WinitWindow {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.event_loop.display_handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = WindowConfig::default();
        assert_eq!(cfg.title, "Vulkan Engine");
        assert_eq!((cfg.width, cfg.height), (1000, 750));
    }

    #[test]
    fn test_resize_is_reported_once() {
        let mut state = WindowState::new(WindowConfig::default());
        state.record_resize(RenderSize::new(800, 600));
        assert_eq!(state.size, RenderSize::new(800, 600));
        assert_eq!(state.pending_resize.take(), Some(RenderSize::new(800, 600)));
        assert_eq!(state.pending_resize, None);

        // Same size again is not a new resize.
        state.record_resize(RenderSize::new(800, 600));
        assert_eq!(state.pending_resize, None);
    }

    #[test]
    fn test_resize_keeps_latest_size() {
        let mut state = WindowState::new(WindowConfig::default());
        state.record_resize(RenderSize::new(0, 0));
        state.record_resize(RenderSize::new(640, 480));
        assert_eq!(state.pending_resize, Some(RenderSize::new(640, 480)));
    }
}
