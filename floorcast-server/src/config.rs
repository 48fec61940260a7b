use clap::Parser;
use floorcast_core::{DeviceMap, LoadOptions};
use std::path::PathBuf;

use crate::state::InferenceSettings;

/// Floor plans arrive as base64 JSON and easily exceed axum's 2 MB default.
pub const DEFAULT_MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

// Define command line arguments
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Floor-plan conditioned image generation server")]
pub struct Args {
    /// Use CPU instead of GPU
    #[arg(long, env = "FLOORCAST_CPU")]
    pub cpu: bool,

    /// Stable Diffusion repository on the model hub
    #[arg(
        long,
        env = "FLOORCAST_MODEL",
        default_value = "stable-diffusion-v1-5/stable-diffusion-v1-5"
    )]
    pub model: String,

    /// Host address to bind the server to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind the server to
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Pre-built frontend bundle served at `/` when present
    #[arg(long, env = "FLOORCAST_STATIC_DIR", default_value = "dist")]
    pub static_dir: PathBuf,

    /// Denoising steps per generation
    #[arg(long, default_value_t = 20, value_parser = clap::value_parser!(u32).range(1..=150))]
    pub steps: u32,

    /// Classifier-free guidance scale
    #[arg(long, default_value_t = 7.5)]
    pub guidance_scale: f64,

    /// Output width in pixels (multiple of 8)
    #[arg(long, default_value_t = 512)]
    pub width: usize,

    /// Output height in pixels (multiple of 8)
    #[arg(long, default_value_t = 512)]
    pub height: usize,

    /// Style presets listed under /api/styles
    #[arg(
        long,
        env = "FLOORCAST_STYLES_FILE",
        default_value = "data/style_prompts.json"
    )]
    pub styles_file: PathBuf,

    /// Extra presets reachable by id but not listed
    #[arg(long, env = "FLOORCAST_STAGING_STYLES_FILE")]
    pub staging_styles_file: Option<PathBuf>,

    /// Largest accepted request body
    #[arg(long, env = "FLOORCAST_MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    pub max_body_bytes: usize,
}

impl Args {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn device_map(&self) -> DeviceMap {
        DeviceMap::from_cpu_flag(self.cpu)
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            device_map: self.device_map(),
            width: self.width,
            height: self.height,
        }
    }

    pub fn inference_settings(&self) -> InferenceSettings {
        InferenceSettings {
            steps: self.steps as usize,
            guidance_scale: self.guidance_scale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_inference_settings() {
        let args = Args::try_parse_from(["floorcast-server"]).unwrap();
        assert_eq!(args.inference_settings(), InferenceSettings::default());
        assert_eq!(args.load_options().width, 512);
        assert_eq!(args.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
        assert_eq!(args.styles_file, PathBuf::from("data/style_prompts.json"));
        assert!(args.staging_styles_file.is_none());
    }

    #[test]
    fn cpu_flag_and_bind_address() {
        let args = Args::try_parse_from([
            "floorcast-server",
            "--cpu",
            "--host",
            "127.0.0.1",
            "--port",
            "9000",
        ])
        .unwrap();
        assert_eq!(args.device_map(), DeviceMap::ForceCpu);
        assert_eq!(args.bind_address(), "127.0.0.1:9000");
    }

    #[test]
    fn zero_steps_rejected() {
        assert!(Args::try_parse_from(["floorcast-server", "--steps", "0"]).is_err());
    }
}
