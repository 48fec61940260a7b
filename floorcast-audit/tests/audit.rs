//! Runs the audit against an in-process server bound to an ephemeral port.

use floorcast_audit::Auditor;
use floorcast_core::{DeviceKind, InferenceRequest, ModelLike};
use floorcast_server::{
    config::DEFAULT_MAX_BODY_BYTES, create_app, AppState, InferenceSettings, ModelHandle,
};
use image::DynamicImage;
use std::sync::Arc;
use tokio::net::TcpListener;

struct EchoModel;

impl ModelLike for EchoModel {
    fn run(&self, request: InferenceRequest) -> anyhow::Result<DynamicImage> {
        Ok(request.control_image)
    }
}

async fn spawn_server(model: ModelHandle) -> String {
    let state = AppState::new(model, DeviceKind::Cpu, InferenceSettings::default());
    let app = create_app(state, None, DEFAULT_MAX_BODY_BYTES);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_full_audit_passes_against_loaded_server() {
    let base_url = spawn_server(ModelHandle::loaded(Arc::new(EchoModel))).await;
    let report = Auditor::new(&base_url).unwrap().run(false).await.unwrap();

    assert_eq!(report.results.len(), 8);
    assert!(report.all_passed(), "failures: {:?}", report.results);
}

#[tokio::test]
async fn test_skip_slow_runs_only_fast_scenarios() {
    let base_url = spawn_server(ModelHandle::loaded(Arc::new(EchoModel))).await;
    let report = Auditor::new(&base_url).unwrap().run(true).await.unwrap();

    let names: Vec<_> = report.results.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(
        names,
        [
            "Health Check",
            "Missing Image Field",
            "Invalid Base64 String",
            "Empty Base64 Data",
            "Not An Image",
        ]
    );
    assert!(report.all_passed());
}

#[tokio::test]
async fn test_audit_fails_without_model() {
    let base_url = spawn_server(ModelHandle::new()).await;
    let report = Auditor::new(&base_url).unwrap().run(true).await.unwrap();

    // Health reports an unloaded model and the image scenarios get 503; the
    // structural 422 check still holds.
    assert_eq!(report.passed(), 1);
    assert_eq!(report.failed(), 4);
    assert!(report.results[1].passed);
}

#[tokio::test]
async fn test_unreachable_server_fails_every_scenario() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let report = Auditor::new(&format!("http://{}", addr))
        .unwrap()
        .run(true)
        .await
        .unwrap();
    assert_eq!(report.passed(), 0);
    assert_eq!(report.failed(), 5);
}
