// SPDX-License-Identifier: CEPL-1.0
use clap::Parser;
use ember_platform::WindowConfig;
use ember_render::{AssetPaths, RenderSettings};
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Config file; missing means defaults
    #[arg(long, default_value = "ember.toml")]
    pub config: PathBuf,
    /// OBJ model to display
    #[arg(long)]
    pub model: Option<PathBuf>,
    /// Texture applied to the model
    #[arg(long)]
    pub texture: Option<PathBuf>,
    #[arg(long)]
    pub width: Option<u32>,
    #[arg(long)]
    pub height: Option<u32>,
    /// Disable the Vulkan validation layer in debug builds
    #[arg(long)]
    pub no_validation: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        let w = WindowConfig::default();
        WindowCfg {
            title: w.title,
            width: w.width,
            height: w.height,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AssetsCfg {
    pub model: PathBuf,
    pub texture: PathBuf,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
}

impl Default for AssetsCfg {
    fn default() -> Self {
        let shaders = ember_render_vk::default_shader_dir();
        AssetsCfg {
            model: PathBuf::from("data/models/chalet.obj"),
            texture: PathBuf::from("data/textures/chalet.jpg"),
            vertex_shader: shaders.join(ember_render_vk::VERTEX_SHADER_FILE),
            fragment_shader: shaders.join(ember_render_vk::FRAGMENT_SHADER_FILE),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub rotate: bool,
    pub degrees_per_second: f32,
    pub validation: bool,
    pub max_consecutive_submit_failures: u32,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            rotate: true,
            degrees_per_second: 22.5,
            validation: cfg!(debug_assertions),
            max_consecutive_submit_failures: 3,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub assets: AssetsCfg,
    pub render: RenderCfg,
}

impl AppCfg {
    /// Reads `path`. A missing file gives defaults; a broken one is reported
    /// and also gives defaults.
    pub fn load(path: &Path) -> AppCfg {
        match fs::read_to_string(path) {
            Ok(s) => Self::parse(&s).unwrap_or_else(|e| {
                warn!("ignoring {}: {e}", path.display());
                AppCfg::default()
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("no {}, using defaults", path.display());
                AppCfg::default()
            }
            Err(e) => {
                warn!("cannot read {}: {e}", path.display());
                AppCfg::default()
            }
        }
    }

    pub fn parse(s: &str) -> Result<AppCfg, toml::de::Error> {
        toml::from_str(s)
    }

    /// Command-line flags win over the file.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(model) = &args.model {
            self.assets.model = model.clone();
        }
        if let Some(texture) = &args.texture {
            self.assets.texture = texture.clone();
        }
        if let Some(width) = args.width {
            self.window.width = width;
        }
        if let Some(height) = args.height {
            self.window.height = height;
        }
        if args.no_validation {
            self.render.validation = false;
        }
    }

    pub fn window_config(&self) -> WindowConfig {
        WindowConfig {
            title: self.window.title.clone(),
            width: self.window.width,
            height: self.window.height,
        }
    }

    pub fn render_settings(&self) -> RenderSettings {
        RenderSettings {
            assets: AssetPaths {
                model: self.assets.model.clone(),
                texture: self.assets.texture.clone(),
                vertex_shader: self.assets.vertex_shader.clone(),
                fragment_shader: self.assets.fragment_shader.clone(),
            },
            rotate: self.render.rotate,
            degrees_per_second: self.render.degrees_per_second,
            validation: self.render.validation,
            max_consecutive_submit_failures: self.render.max_consecutive_submit_failures,
        }
    }

    pub fn log_summary(&self) {
        info!(
            "config: {}x{} model={} texture={} validation={}",
            self.window.width,
            self.window.height,
            self.assets.model.display(),
            self.assets.texture.display(),
            self.render.validation
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppCfg::default();
        assert_eq!(cfg.window.title, "Vulkan Engine");
        assert_eq!((cfg.window.width, cfg.window.height), (1000, 750));
        assert_eq!(cfg.assets.model, PathBuf::from("data/models/chalet.obj"));
        assert!(cfg.assets.vertex_shader.ends_with("mesh.vert.spv"));
        assert!(cfg.assets.fragment_shader.ends_with("mesh.frag.spv"));
        assert!(cfg.render.rotate);
        assert_eq!(cfg.render.degrees_per_second, 22.5);
        assert_eq!(cfg.render.max_consecutive_submit_failures, 3);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let cfg = AppCfg::parse(
            r#"
            [window]
            width = 640

            [render]
            clear_color = [0.1, 0.2, 0.3, 1.0]
            rotate = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.window.width, 640);
        assert_eq!(cfg.window.height, 750);
        assert_eq!(cfg.render.clear_color, [0.1, 0.2, 0.3, 1.0]);
        assert!(!cfg.render.rotate);
        assert_eq!(cfg.render.degrees_per_second, 22.5);
        assert_eq!(cfg.assets.texture, PathBuf::from("data/textures/chalet.jpg"));
    }

    #[test]
    fn test_broken_file_is_an_error() {
        assert!(AppCfg::parse("[window\nwidth = ").is_err());
        assert!(AppCfg::parse("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let cfg = AppCfg::load(Path::new("definitely/not/here/ember.toml"));
        assert_eq!(cfg.window.width, 1000);
    }

    #[test]
    fn test_args_override_file() {
        let mut cfg = AppCfg::parse("[window]\nwidth = 640\nheight = 480").unwrap();
        let args = Args::parse_from([
            "ember",
            "--model",
            "viking.obj",
            "--height",
            "900",
            "--no-validation",
        ]);
        cfg.apply_args(&args);
        assert_eq!(cfg.window.width, 640);
        assert_eq!(cfg.window.height, 900);
        assert_eq!(cfg.assets.model, PathBuf::from("viking.obj"));
        assert_eq!(cfg.assets.texture, PathBuf::from("data/textures/chalet.jpg"));
        assert!(!cfg.render.validation);

        let settings = cfg.render_settings();
        assert_eq!(settings.assets.model, PathBuf::from("viking.obj"));
        assert!(!settings.validation);
        assert_eq!(cfg.window_config().height, 900);
    }

    #[test]
    fn test_config_flag_default() {
        let args = Args::parse_from(["ember"]);
        assert_eq!(args.config, PathBuf::from("ember.toml"));
        assert!(!args.no_validation);
    }
}
