use anyhow::{anyhow, Context, Error, Result};
use candle_core::{DType, Device, IndexOp, Module, Tensor};
use candle_transformers::models::stable_diffusion::{
    self, clip::ClipTextTransformer, unet_2d::UNet2DConditionModel, vae::AutoEncoderKL,
    StableDiffusionConfig,
};
use hf_hub::api::tokio::Api;
use image::DynamicImage;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::{
    image_to_tensor, select_best_device, tensor_to_image, InferenceRequest, LoadOptions, Loader,
    ModelLike, ModelVariant,
};

const VAE_SCALE: f64 = 0.18215;

/// Share of the denoising schedule a full-weight control image takes away.
const CONTROL_BLEND: f64 = 0.6;

/// Maps a control weight onto an image-to-image denoising strength.
///
/// Weight 0 gives strength 1.0, which discards the control image and runs the
/// full schedule from noise. Weight 1 keeps the most structure (strength 0.4).
/// Weights outside [0, 1] are clamped.
pub fn denoise_strength(control_strength: f64) -> f64 {
    1.0 - CONTROL_BLEND * control_strength.clamp(0.0, 1.0)
}

/// First scheduler step to run for a given denoising strength.
pub fn start_step(steps: usize, strength: f64) -> usize {
    let skipped = (steps as f64 * strength.clamp(0.0, 1.0)) as usize;
    steps - skipped.min(steps)
}

/// Where the denoising loop's first latents come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatentStart {
    /// Pure noise scaled by the scheduler; the control image is not encoded.
    Noise,
    /// The encoded control image, noised to the timestep at this index.
    Control(usize),
    /// The encoded control image as is; no step is left to run.
    Unchanged,
}

impl LatentStart {
    pub fn for_strength(steps: usize, strength: f64) -> Self {
        match start_step(steps, strength) {
            0 => LatentStart::Noise,
            t if t < steps => LatentStart::Control(t),
            _ => LatentStart::Unchanged,
        }
    }

    /// Index of the first timestep the loop runs.
    pub fn first_step(&self, steps: usize) -> usize {
        match *self {
            LatentStart::Noise => 0,
            LatentStart::Control(t) => t,
            LatentStart::Unchanged => steps,
        }
    }
}

fn sd_config(variant: ModelVariant, width: usize, height: usize) -> StableDiffusionConfig {
    match variant {
        ModelVariant::V1_5 => StableDiffusionConfig::v1_5(None, Some(height), Some(width)),
        ModelVariant::V2_1 => StableDiffusionConfig::v2_1(None, Some(height), Some(width)),
    }
}

pub struct StableDiffusionModel {
    variant: ModelVariant,
    device: Device,
    dtype: DType,
    width: usize,
    height: usize,
    tokenizer: Tokenizer,
    pad_id: u32,
    max_tokens: usize,
    text_model: ClipTextTransformer,
    vae: AutoEncoderKL,
    unet: UNet2DConditionModel,
}

impl StableDiffusionModel {
    fn encode_text(&self, text: &str) -> Result<Tensor> {
        let mut tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(Error::msg)?
            .get_ids()
            .to_vec();
        tokens.truncate(self.max_tokens);
        tokens.resize(self.max_tokens, self.pad_id);
        let input_ids = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
        Ok(self.text_model.forward(&input_ids)?)
    }

    /// Prompt embeddings, preceded by the negative prompt's when guidance is on.
    fn text_embeddings(&self, prompt: &str, negative_prompt: &str, guided: bool) -> Result<Tensor> {
        let cond = self.encode_text(prompt)?;
        let embeddings = if guided {
            let uncond = self.encode_text(negative_prompt)?;
            Tensor::cat(&[uncond, cond], 0)?
        } else {
            cond
        };
        Ok(embeddings.to_dtype(self.dtype)?)
    }

    fn encode_control(&self, control_image: &DynamicImage) -> Result<Tensor> {
        let control = image_to_tensor(control_image, self.width, self.height)?
            .to_device(&self.device)?
            .to_dtype(self.dtype)?;
        Ok((self.vae.encode(&control)?.sample()? * VAE_SCALE)?)
    }
}

impl ModelLike for StableDiffusionModel {
    fn run(&self, request: InferenceRequest) -> Result<DynamicImage> {
        if request.steps == 0 {
            anyhow::bail!("at least one inference step is required");
        }
        let config = sd_config(self.variant, self.width, self.height);
        let guided = request.guidance_scale > 1.0;

        let text_embeddings =
            self.text_embeddings(&request.prompt, &request.negative_prompt, guided)?;

        let mut scheduler = config.build_scheduler(request.steps)?;
        let timesteps = scheduler.timesteps().to_vec();
        let strength = denoise_strength(request.control_strength);
        let start = LatentStart::for_strength(timesteps.len(), strength);
        let t_start = start.first_step(timesteps.len());
        debug!(
            "Denoising {} of {} steps (strength {:.2}, {:?})",
            timesteps.len() - t_start,
            timesteps.len(),
            strength,
            start
        );

        // --- Initial latents: noise, or the encoded control image ---
        let mut latents = match start {
            LatentStart::Noise => {
                let noise = Tensor::randn(
                    0f32,
                    1f32,
                    (1, 4, self.height / 8, self.width / 8),
                    &self.device,
                )?;
                (noise * scheduler.init_noise_sigma())?.to_dtype(self.dtype)?
            }
            LatentStart::Control(t) => {
                let latents = self.encode_control(&request.control_image)?;
                let noise = latents.randn_like(0f64, 1f64)?;
                scheduler.add_noise(&latents, noise, timesteps[t])?
            }
            LatentStart::Unchanged => self.encode_control(&request.control_image)?,
        };

        for &timestep in timesteps.iter().skip(t_start) {
            let latent_model_input = if guided {
                Tensor::cat(&[&latents, &latents], 0)?
            } else {
                latents.clone()
            };
            let latent_model_input = scheduler.scale_model_input(latent_model_input, timestep)?;
            let noise_pred =
                self.unet
                    .forward(&latent_model_input, timestep as f64, &text_embeddings)?;
            let noise_pred = if guided {
                let noise_pred = noise_pred.chunk(2, 0)?;
                let (uncond, text) = (&noise_pred[0], &noise_pred[1]);
                (uncond + ((text - uncond)? * request.guidance_scale)?)?
            } else {
                noise_pred
            };
            latents = scheduler.step(&noise_pred, timestep, &latents)?;
        }

        // --- Decode and rescale to u8 pixels ---
        let decoded = self.vae.decode(&(&latents / VAE_SCALE)?)?;
        let img = ((decoded / 2.)? + 0.5)?.to_device(&Device::Cpu)?;
        let img = (img.clamp(0f32, 1.)? * 255.)?.to_dtype(DType::U8)?.i(0)?;

        tensor_to_image(&img)
    }
}

pub struct StableDiffusionLoader;

impl Loader for StableDiffusionLoader {
    type Model = StableDiffusionModel;

    async fn load(
        repo_id: String,
        variant: ModelVariant,
        api: Api,
        options: LoadOptions,
    ) -> Result<Self::Model> {
        if options.width % 8 != 0 || options.height % 8 != 0 {
            anyhow::bail!(
                "output size {}x{} must be a multiple of 8",
                options.width,
                options.height
            );
        }

        // Configure device.
        let device = select_best_device(options.device_map).context("failed to set up device")?;
        let dtype = if device.is_cpu() {
            DType::F32
        } else {
            DType::F16
        };
        let suffix = if dtype == DType::F16 { ".fp16" } else { "" };
        let repo = api.repo(hf_hub::Repo::model(repo_id.clone()));

        // --- Fetch weights and tokenizer ---
        let clip_file = repo
            .get(&format!("text_encoder/model{suffix}.safetensors"))
            .await
            .context("failed to get CLIP weights")?;
        let vae_file = repo
            .get(&format!("vae/diffusion_pytorch_model{suffix}.safetensors"))
            .await
            .context("failed to get VAE weights")?;
        let unet_file = repo
            .get(&format!("unet/diffusion_pytorch_model{suffix}.safetensors"))
            .await
            .context("failed to get UNet weights")?;
        let tokenizer_file = api
            .model(variant.tokenizer_repo().to_string())
            .get("tokenizer.json")
            .await
            .context("failed to get CLIP tokenizer")?;

        // Nothing below awaits, keeping the config out of the future's state.
        let config = sd_config(variant, options.width, options.height);

        // --- Load CLIP text encoder and tokenizer ---
        let text_model =
            stable_diffusion::build_clip_transformer(&config.clip, clip_file, &device, DType::F32)
                .context("failed to load CLIP text encoder")?;
        let tokenizer = Tokenizer::from_file(tokenizer_file)
            .map_err(anyhow::Error::msg)
            .context("failed to load CLIP tokenizer")?;
        let pad_token = config.clip.pad_with.as_deref().unwrap_or("<|endoftext|>");
        let pad_id = *tokenizer
            .get_vocab(true)
            .get(pad_token)
            .ok_or_else(|| anyhow!("tokenizer has no {pad_token} token"))?;

        // --- Load autoencoder ---
        let vae = config
            .build_vae(vae_file, &device, dtype)
            .context("failed to load VAE")?;

        // --- Load UNet ---
        let unet = config
            .build_unet(unet_file, &device, 4, cfg!(feature = "flash-attn"), dtype)
            .context("failed to load UNet")?;

        info!("Loaded {} on {:?} ({:?})", repo_id, device, dtype);

        Ok(StableDiffusionModel {
            variant,
            device,
            dtype,
            width: options.width,
            height: options.height,
            tokenizer,
            pad_id,
            max_tokens: config.clip.max_position_embeddings,
            text_model,
            vae,
            unet,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_weight_keeps_most_structure() {
        assert!((denoise_strength(1.0) - 0.4).abs() < 1e-9);
        assert!((denoise_strength(0.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn weights_are_clamped() {
        assert_eq!(denoise_strength(3.0), denoise_strength(1.0));
        assert_eq!(denoise_strength(-2.0), denoise_strength(0.0));
    }

    #[test]
    fn start_step_follows_strength() {
        assert_eq!(start_step(20, 1.0), 0);
        assert_eq!(start_step(20, 0.4), 12);
        assert_eq!(start_step(20, 0.0), 20);
        assert_eq!(start_step(0, 0.5), 0);
    }

    #[test]
    fn zero_weight_starts_from_noise() {
        let strength = denoise_strength(0.0);
        assert_eq!(LatentStart::for_strength(20, strength), LatentStart::Noise);
        assert_eq!(LatentStart::Noise.first_step(20), 0);
    }

    #[test]
    fn partial_weight_noises_the_control_image() {
        let start = LatentStart::for_strength(20, denoise_strength(1.0));
        assert_eq!(start, LatentStart::Control(12));
        assert_eq!(start.first_step(20), 12);
        assert_eq!(LatentStart::for_strength(20, 0.0), LatentStart::Unchanged);
        assert_eq!(LatentStart::Unchanged.first_step(20), 20);
    }
}
