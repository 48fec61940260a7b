pub mod device_map;
pub mod loader;
mod loader_factory;
mod util;

mod stable_diffusion;

pub use device_map::*;
use image::DynamicImage;
pub use loader::*;
pub use loader_factory::*;
pub use stable_diffusion::{
    denoise_strength, start_step, LatentStart, StableDiffusionLoader, StableDiffusionModel,
};
pub use util::*;

/// Everything the pipeline needs for one conditioned generation.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub prompt: String,
    pub negative_prompt: String,
    /// Reference image steering the composition of the output.
    pub control_image: DynamicImage,
    pub control_strength: f64,
    pub steps: usize,
    pub guidance_scale: f64,
}

pub trait ModelLike: Send + Sync {
    fn run(&self, request: InferenceRequest) -> anyhow::Result<DynamicImage>;
}
