use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use floorcast_core::InferenceRequest;
use std::time::Instant;
use tracing::{debug, error, info};

use crate::{
    api::{
        CategoryStylesResponse, GenerationRequest, GenerationResponse, HealthStatus,
        StyleListResponse, StyleResponse,
    },
    error::ApiError,
    image_codec,
    state::AppState,
};

/// GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus::ok(state.device, state.model.is_loaded()))
}

/// POST /api/generate
///
/// Body validation runs before the model check, so a structurally invalid
/// request is a 422 even while the model is still loading.
pub async fn generate_handler(
    State(state): State<AppState>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Json<GenerationResponse>, ApiError> {
    let Json(request) = payload?;

    let model = state
        .model
        .get()
        .ok_or_else(|| ApiError::ServiceUnavailable("Model not loaded".to_string()))?;

    debug!(
        "Generation request: prompt_len={}, negative_prompt={}, controlnet={:?}",
        request.prompt.len(),
        request.negative_prompt.is_some(),
        request.controlnet
    );
    if let Some(forensics) = &request.forensics {
        debug!(
            "Ignoring forensics metadata ({} keys), not used by generation",
            forensics.len()
        );
    }

    let control_image = image_codec::decode_image(&request.image)?;
    let control_strength = request.control_strength();
    let inference = InferenceRequest {
        prompt: request.prompt,
        negative_prompt: request.negative_prompt.unwrap_or_default(),
        control_image,
        control_strength,
        steps: state.settings.steps,
        guidance_scale: state.settings.guidance_scale,
    };

    info!("Starting generation...");
    let started = Instant::now();
    let output = tokio::task::spawn_blocking(move || model.run(inference))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(|e| {
            error!("Generation error: {:#}", e);
            ApiError::Internal(format!("{:#}", e))
        })?;
    let elapsed = started.elapsed();
    info!("Generation complete in {:.2}s", elapsed.as_secs_f64());

    let image = image_codec::encode_png_data_uri(&output)
        .map_err(|e| ApiError::Internal(format!("{:#}", e)))?;
    let processing_time = (elapsed.as_secs_f64() * 1000.0).round() as u64;

    Ok(Json(GenerationResponse::success(image, processing_time)))
}

/// GET /api/styles
pub async fn list_styles_handler(State(state): State<AppState>) -> Json<StyleListResponse> {
    let styles = state.styles.public().cloned().collect();
    Json(StyleListResponse::success(
        styles,
        state.styles.categories().clone(),
    ))
}

/// GET /api/styles/{style_id}
pub async fn style_handler(
    State(state): State<AppState>,
    Path(style_id): Path<String>,
) -> Result<Json<StyleResponse>, ApiError> {
    let style = state
        .styles
        .get(&style_id)
        .ok_or_else(|| ApiError::NotFound(format!("Style preset '{}' not found", style_id)))?;
    Ok(Json(StyleResponse::success(style.clone())))
}

/// GET /api/styles/category/{category}
pub async fn category_styles_handler(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Result<Json<CategoryStylesResponse>, ApiError> {
    let found = state
        .styles
        .category(&category)
        .ok_or_else(|| ApiError::NotFound(format!("Category '{}' not found", category)))?;
    let styles = state
        .styles
        .in_category(&category)
        .into_iter()
        .cloned()
        .collect();
    Ok(Json(CategoryStylesResponse::success(found.clone(), styles)))
}
