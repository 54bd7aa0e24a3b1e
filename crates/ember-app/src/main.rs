// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::Result;
use clap::Parser;
use ember_core::{init_tracing, FpsCounter};
use ember_platform::WinitWindow;
use ember_render::{RenderWindow, Renderer};
use ember_render_vk::{InitStep, VkRenderer};
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{error, info};

mod config;

use config::{AppCfg, Args};

fn run(cfg: &AppCfg) -> Result<()> {
    let mut window = WinitWindow::new(cfg.window_config())?;
    let mut renderer = VkRenderer::new(&window, &cfg.render_settings())?;
    apply_render_config(&mut renderer, cfg)?;
    let mut fps = FpsCounter::new(Duration::from_secs(1));

    let result = frame_loop(&mut window, &mut renderer, &mut fps);

    // Renderer resources go first, then the window they were bound to.
    let idle = renderer.wait_idle();
    drop(renderer);
    drop(window);
    result.and(idle)
}

/// Settings the renderer takes after construction.
fn apply_render_config(renderer: &mut impl Renderer, cfg: &AppCfg) -> Result<()> {
    renderer.set_clear_color(cfg.render.clear_color)
}

fn frame_loop(window: &mut WinitWindow, renderer: &mut VkRenderer, fps: &mut FpsCounter) -> Result<()> {
    while !window.should_close() {
        window.pump_events();
        window.update();
        if window.should_close() {
            break;
        }
        if let Some(size) = window.take_resize() {
            renderer.resize(size)?;
        }
        if window.size().is_zero_area() {
            fps.reset(Instant::now());
            continue;
        }
        renderer.render()?;
        if let Some(frames) = fps.tick(Instant::now()) {
            info!("fps ~ {frames}");
        }
    }
    info!("window closed");
    Ok(())
}

fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();
    let mut cfg = AppCfg::load(&args.config);
    cfg.apply_args(&args);
    cfg.log_summary();

    match run(&cfg) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match InitStep::of(&e) {
                Some(step) => error!("initialization failed at {step}: {e:#}"),
                None => error!("fatal: {e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_render::{RenderSettings, RenderSize};

    #[derive(Default)]
    struct RecordingRenderer {
        clear_color: Option<[f32; 4]>,
    }

    impl Renderer for RecordingRenderer {
        fn new(_window: &dyn RenderWindow, _settings: &RenderSettings) -> Result<Self> {
            anyhow::bail!("no window in tests")
        }
        fn resize(&mut self, _size: RenderSize) -> Result<()> {
            Ok(())
        }
        fn render(&mut self) -> Result<()> {
            Ok(())
        }
        fn set_clear_color(&mut self, rgba: [f32; 4]) -> Result<()> {
            self.clear_color = Some(rgba);
            Ok(())
        }
        fn wait_idle(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_configured_clear_color_reaches_renderer() {
        let cfg = AppCfg::parse("[render]\nclear_color = [0.2, 0.4, 0.6, 1.0]").unwrap();
        let mut renderer = RecordingRenderer::default();
        apply_render_config(&mut renderer, &cfg).unwrap();
        assert_eq!(renderer.clear_color, Some([0.2, 0.4, 0.6, 1.0]));
    }
}
