use anyhow::{anyhow, Result};
use hf_hub::api::tokio::Api;
use tracing::info;

use crate::{LoadOptions, Loader, ModelLike, StableDiffusionLoader};
use std::sync::Arc;

/// Stable Diffusion families sharing the single-CLIP pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelVariant {
    V1_5,
    V2_1,
}

impl ModelVariant {
    /// Detect model variant from a hub repository name
    pub fn from_name(model_name: &str) -> Option<Self> {
        let name = model_name.to_lowercase();

        if !name.contains("stable-diffusion") && !name.contains("sd") {
            return None;
        }
        if name.contains("xl") || name.contains("turbo") {
            // Dual text encoders, not supported by this pipeline.
            None
        } else if name.contains("base") {
            // 512px epsilon-prediction checkpoints; the 2.1 config is v-prediction.
            None
        } else if name.contains("v1-5") || name.contains("v1.5") || name.contains("1-5") {
            Some(ModelVariant::V1_5)
        } else if name.contains("2-1") || name.contains("2.1") {
            Some(ModelVariant::V2_1)
        } else {
            None
        }
    }

    /// Repository holding the CLIP tokenizer for this variant.
    pub fn tokenizer_repo(&self) -> &'static str {
        match self {
            ModelVariant::V1_5 | ModelVariant::V2_1 => "openai/clip-vit-base-patch32",
        }
    }
}

/// Load a model based on its name, automatically detecting the appropriate loader
pub async fn load_model(
    model_name: &str,
    api: Api,
    options: LoadOptions,
) -> Result<Arc<dyn ModelLike>> {
    let variant = ModelVariant::from_name(model_name)
        .ok_or_else(|| anyhow!("Unsupported model: {}", model_name))?;

    info!(
        "Loading model: {} (detected variant: {:?}, {}x{})",
        model_name, variant, options.width, options.height
    );

    let model = StableDiffusionLoader::load(model_name.to_string(), variant, api, options).await?;
    Ok(Arc::new(model))
}
