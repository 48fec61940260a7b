pub mod api;
pub mod config;
pub mod error;
pub mod handlers;
pub mod image_codec;
pub mod state;
pub mod styles;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::path::Path;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::info;

pub use state::{AppState, InferenceSettings, ModelHandle};
pub use styles::StyleCatalog;

/// Builds the service router. The static bundle is mounted at `/` only if
/// `static_dir` exists when this is called.
pub fn create_app(state: AppState, static_dir: Option<&Path>, max_body_bytes: usize) -> Router {
    let app = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/api/generate", post(handlers::generate_handler))
        .route("/api/styles", get(handlers::list_styles_handler))
        .route("/api/styles/{style_id}", get(handlers::style_handler))
        .route(
            "/api/styles/category/{category}",
            get(handlers::category_styles_handler),
        )
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state);

    let app = match static_dir {
        Some(dir) if dir.is_dir() => {
            info!("Serving static files from {}", dir.display());
            app.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true))
        }
        _ => app,
    };

    app.layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
