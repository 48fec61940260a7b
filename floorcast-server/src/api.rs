//! Request and response bodies of the HTTP API.

use floorcast_core::DeviceKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::styles::{StyleCategory, StylePreset};

/// Default conditioning weight when `controlnet.weight` is absent.
pub const DEFAULT_CONTROL_STRENGTH: f64 = 1.0;

/// Body of `POST /api/generate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Base64 floor-plan image, optionally prefixed with `data:<mime>;base64,`
    pub image: String,

    pub prompt: String,

    #[serde(default)]
    pub negative_prompt: Option<String>,

    #[serde(default)]
    pub controlnet: Option<ControlNetParams>,

    /// Style analysis from the frontend. Accepted, never used for generation.
    #[serde(default)]
    pub forensics: Option<Map<String, Value>>,
}

impl GenerationRequest {
    pub fn control_strength(&self) -> f64 {
        self.controlnet
            .as_ref()
            .and_then(|c| c.weight)
            .unwrap_or(DEFAULT_CONTROL_STRENGTH)
    }
}

/// Conditioning parameters. Keys other than these are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlNetParams {
    #[serde(default)]
    pub module: Option<String>,

    #[serde(default)]
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub status: String,
    /// `data:image/png;base64,...`
    pub image: String,
    pub meta: GenerationMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationMeta {
    /// Wall-clock time of the model call in milliseconds
    pub processing_time: u64,
}

impl GenerationResponse {
    pub fn success(image: String, processing_time: u64) -> Self {
        Self {
            status: "success".to_string(),
            image,
            meta: GenerationMeta { processing_time },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub device: DeviceKind,
    pub model_loaded: bool,
}

impl HealthStatus {
    pub fn ok(device: DeviceKind, model_loaded: bool) -> Self {
        Self {
            status: "ok".to_string(),
            device,
            model_loaded,
        }
    }
}

/// Body of `GET /api/styles`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleListResponse {
    pub status: String,
    pub styles: Vec<StylePreset>,
    pub categories: BTreeMap<String, StyleCategory>,
    pub total: usize,
}

impl StyleListResponse {
    pub fn success(styles: Vec<StylePreset>, categories: BTreeMap<String, StyleCategory>) -> Self {
        Self {
            status: "success".to_string(),
            total: styles.len(),
            styles,
            categories,
        }
    }
}

/// Body of `GET /api/styles/{style_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleResponse {
    pub status: String,
    pub style: StylePreset,
}

impl StyleResponse {
    pub fn success(style: StylePreset) -> Self {
        Self {
            status: "success".to_string(),
            style,
        }
    }
}

/// Body of `GET /api/styles/category/{category}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryStylesResponse {
    pub status: String,
    pub category: StyleCategory,
    pub styles: Vec<StylePreset>,
    pub total: usize,
}

impl CategoryStylesResponse {
    pub fn success(category: StyleCategory, styles: Vec<StylePreset>) -> Self {
        Self {
            status: "success".to_string(),
            category,
            total: styles.len(),
            styles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_with_all_fields() {
        let json = r##"{
            "image": "data:image/png;base64,AAAA",
            "prompt": "Architectural floor plan",
            "negative_prompt": "text, watermark",
            "controlnet": {"module": "mlsd", "weight": 0.5},
            "forensics": {"engine": "Octane", "hex_palette": ["#000000"]}
        }"##;
        let req: GenerationRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.negative_prompt.as_deref(), Some("text, watermark"));
        assert_eq!(req.controlnet.as_ref().unwrap().module.as_deref(), Some("mlsd"));
        assert_eq!(req.control_strength(), 0.5);
        assert_eq!(req.forensics.unwrap()["engine"], "Octane");
    }

    #[test]
    fn control_strength_defaults_to_one() {
        let req: GenerationRequest =
            serde_json::from_str(r#"{"image": "AAAA", "prompt": ""}"#).unwrap();
        assert!(req.controlnet.is_none());
        assert_eq!(req.control_strength(), 1.0);

        let req: GenerationRequest = serde_json::from_str(
            r#"{"image": "AAAA", "prompt": "", "controlnet": {"module": "mlsd"}}"#,
        )
        .unwrap();
        assert_eq!(req.control_strength(), 1.0);
    }

    #[test]
    fn missing_image_is_rejected() {
        let err = serde_json::from_str::<GenerationRequest>(r#"{"prompt": "a plan"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("image"));
    }

    #[test]
    fn health_serializes_device_label() {
        let health = HealthStatus::ok(DeviceKind::Accelerator, false);
        let value = serde_json::to_value(&health).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"status": "ok", "device": "accelerator", "model_loaded": false})
        );
    }
}
