use anyhow::{Context, Result};
use clap::Parser;
use floorcast_core::{load_model, select_best_device, DeviceKind};
use floorcast_server::{config::Args, create_app, AppState, ModelHandle, StyleCatalog};
use hf_hub::api::tokio::Api;
use tokio::{net::TcpListener, signal};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "floorcast_server=info,floorcast_core=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let device = select_best_device(args.device_map()).context("failed to set up device")?;
    let device_kind = DeviceKind::of(&device);
    info!("Using device: {}", device_kind);

    let model = ModelHandle::new();
    let styles = StyleCatalog::load(&args.styles_file, args.staging_styles_file.as_deref());
    let app_state = AppState::new(model.clone(), device_kind, args.inference_settings())
        .with_styles(styles);

    // --- Load the pipeline in the background; generate answers 503 until it is ready ---
    let loader_args = args.clone();
    let loader_handle = model.clone();
    tokio::spawn(async move {
        info!("Loading Stable Diffusion pipeline...");
        let result = loader_handle
            .load_with(|| async {
                let api = Api::new()?;
                load_model(&loader_args.model, api, loader_args.load_options()).await
            })
            .await;
        match result {
            Ok(_) => info!("Model loaded successfully."),
            // Static files and health stay available.
            Err(e) => error!("Failed to load model: {:#}", e),
        }
    });

    let app = create_app(app_state, Some(&args.static_dir), args.max_body_bytes);

    // --- Start the server ---
    let bind_address = args.bind_address();
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {}", bind_address))?;
    info!("Started server on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    drop(model);
    info!("Server stopped, model released");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
