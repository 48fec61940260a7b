//! Post-deployment audit of a running floorcast server.
//!
//! Runs a fixed checklist against `/health` and `/api/generate`, compares
//! status codes and response shapes, and tallies the outcome. Every scenario
//! runs even when an earlier one failed, and nothing is retried.

use anyhow::{anyhow, bail, Context, Result};
use base64::{prelude::BASE64_STANDARD, Engine};
use image::{DynamicImage, Rgb, RgbImage};
use serde_json::{json, Value};
use std::{io::Cursor, time::Duration};
use tracing::{error, info, warn};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";

pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(30);
pub const FAST_TIMEOUT: Duration = Duration::from_secs(120);
/// Inference-backed scenarios; a CPU generation can take minutes.
pub const SLOW_TIMEOUT: Duration = Duration::from_secs(180);

const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// One request against `/api/generate` and the status it must produce.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: &'static str,
    pub payload: Value,
    pub expected_status: u16,
    pub timeout: Duration,
}

impl Scenario {
    fn new(name: &'static str, payload: Value, expected_status: u16, timeout: Duration) -> Self {
        Self {
            name,
            payload,
            expected_status,
            timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioResult {
    pub name: String,
    pub passed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AuditReport {
    pub results: Vec<ScenarioResult>,
}

impl AuditReport {
    fn record(&mut self, name: &str, outcome: Result<()>) {
        if let Err(e) = &outcome {
            error!("FAILED: {:#}", e);
        }
        self.results.push(ScenarioResult {
            name: name.to_string(),
            passed: outcome.is_ok(),
        });
    }

    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }

    pub fn all_passed(&self) -> bool {
        self.failed() == 0
    }

    pub fn log_summary(&self) {
        info!("{}", "=".repeat(50));
        info!("AUDIT SUMMARY");
        info!("{}", "=".repeat(50));
        for result in &self.results {
            let status = if result.passed { "PASS" } else { "FAIL" };
            info!("  {}: {}", result.name, status);
        }
        info!("{}", "-".repeat(50));
        info!("Total: {}/{} tests passed", self.passed(), self.results.len());
        if self.all_passed() {
            info!("AUDIT RESULT: ALL TESTS PASSED");
        } else {
            error!("AUDIT RESULT: {} TESTS FAILED", self.failed());
        }
    }
}

/// A 512x512 white PNG as a data URI.
pub fn white_png_data_uri() -> Result<String> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(512, 512, Rgb([255, 255, 255])));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
    Ok(format!("{}{}", PNG_DATA_URI_PREFIX, BASE64_STANDARD.encode(&bytes)))
}

/// The complete request every other scenario is derived from.
pub fn happy_payload(image: &str) -> Value {
    json!({
        "image": image,
        "prompt": "Architectural floor plan, Isometric Projection, style of Octane Render",
        "negative_prompt": "text, watermark",
        "controlnet": {"module": "mlsd", "weight": 1.0},
        "forensics": {"hex_palette": ["#000000"], "engine": "Octane", "materiality": "Sketch"}
    })
}

fn with_field(base: &Value, key: &str, value: Value) -> Value {
    let mut payload = base.clone();
    payload[key] = value;
    payload
}

fn without_field(base: &Value, key: &str) -> Value {
    let mut payload = base.clone();
    if let Some(object) = payload.as_object_mut() {
        object.remove(key);
    }
    payload
}

/// Validation scenarios that never reach the model.
pub fn fast_scenarios(base: &Value) -> Vec<Scenario> {
    let not_an_image = format!(
        "{}{}",
        PNG_DATA_URI_PREFIX,
        BASE64_STANDARD.encode(b"not an image")
    );
    vec![
        Scenario::new(
            "Missing Image Field",
            without_field(base, "image"),
            422,
            FAST_TIMEOUT,
        ),
        Scenario::new(
            "Invalid Base64 String",
            with_field(base, "image", json!("not_an_image_string")),
            400,
            FAST_TIMEOUT,
        ),
        Scenario::new(
            "Empty Base64 Data",
            with_field(base, "image", json!(PNG_DATA_URI_PREFIX)),
            400,
            FAST_TIMEOUT,
        ),
        Scenario::new(
            "Not An Image",
            with_field(base, "image", json!(not_an_image)),
            400,
            FAST_TIMEOUT,
        ),
    ]
}

/// End-to-end scenarios that run a full generation.
pub fn slow_scenarios(base: &Value) -> Vec<Scenario> {
    vec![
        Scenario::new("Happy Path", base.clone(), 200, SLOW_TIMEOUT),
        Scenario::new(
            "Empty Prompt",
            with_field(base, "prompt", json!("")),
            200,
            SLOW_TIMEOUT,
        ),
        Scenario::new(
            "Missing ControlNet",
            without_field(base, "controlnet"),
            200,
            SLOW_TIMEOUT,
        ),
    ]
}

/// Checks a 200 body and returns its processing time.
pub fn check_success_body(body: &Value) -> Result<u64> {
    let image = body
        .get("image")
        .context("'image' key missing in success response")?;
    if body.get("status").and_then(Value::as_str) != Some("success") {
        bail!(
            "Response status is not 'success': {}",
            body.get("status").unwrap_or(&Value::Null)
        );
    }
    let image = image.as_str().context("'image' is not a string")?;
    let payload = image
        .strip_prefix(PNG_DATA_URI_PREFIX)
        .context("'image' is not a PNG data URI")?;
    let bytes = BASE64_STANDARD
        .decode(payload)
        .context("'image' is not valid base64")?;
    image::load_from_memory_with_format(&bytes, image::ImageFormat::Png)
        .context("'image' is not a decodable PNG")?;
    body.pointer("/meta/processing_time")
        .and_then(Value::as_u64)
        .context("'meta.processing_time' is not a non-negative integer")
}

pub struct Auditor {
    client: reqwest::Client,
    base_url: String,
}

impl Auditor {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn describe(err: reqwest::Error, timeout: Duration) -> anyhow::Error {
        if err.is_timeout() {
            anyhow!("Request timed out after {}s", timeout.as_secs())
        } else {
            anyhow::Error::new(err).context("Exception occurred")
        }
    }

    pub async fn check_health(&self) -> Result<()> {
        info!("--- Testing Health Endpoint ---");
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map_err(|e| Self::describe(e, HEALTH_TIMEOUT))?;
        let status = response.status();
        info!("Status Code: {}", status.as_u16());
        if status.as_u16() != 200 {
            bail!("Health check returned {}", status.as_u16());
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| Self::describe(e, HEALTH_TIMEOUT))?;
        info!("Health Response: {}", data);
        if data.get("status").and_then(Value::as_str) != Some("ok") {
            bail!("Health status is not 'ok'");
        }
        if data.get("model_loaded").and_then(Value::as_bool) != Some(true) {
            warn!("WARNING: Model not loaded - API calls will fail with 503");
            bail!("Model not loaded");
        }
        info!("Success: Health check passed");
        Ok(())
    }

    pub async fn run_scenario(&self, scenario: &Scenario) -> Result<()> {
        info!("--- Running Scenario: {} ---", scenario.name);
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&scenario.payload)
            .timeout(scenario.timeout)
            .send()
            .await
            .map_err(|e| Self::describe(e, scenario.timeout))?;

        let status = response.status().as_u16();
        info!(
            "Status Code: {} (Expected: {})",
            status, scenario.expected_status
        );
        let text = response
            .text()
            .await
            .map_err(|e| Self::describe(e, scenario.timeout))?;
        if status != scenario.expected_status {
            let snippet: String = text.chars().take(500).collect();
            bail!("Status code mismatch. Response: {}", snippet);
        }
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        match status {
            200 => {
                let processing_time = check_success_body(&body)?;
                info!(
                    "Success: Image returned. Processing time: {}ms",
                    processing_time
                );
            }
            400 => {
                match body.get("detail").and_then(Value::as_str) {
                    Some(detail) => {
                        let snippet: String = detail.chars().take(100).collect();
                        info!("Success: Got expected 400 with detail: {}", snippet);
                    }
                    None => warn!("Note: 400 response missing 'detail' field"),
                }
                info!("Success: Correctly received error {}", status);
            }
            _ => info!("Success: Correctly received error {}", status),
        }
        Ok(())
    }

    /// Runs the health check, the fast scenarios and, unless `skip_slow`, the
    /// inference-backed ones.
    pub async fn run(&self, skip_slow: bool) -> Result<AuditReport> {
        info!("Starting Backend Audit against {}", self.base_url);
        let mut report = AuditReport::default();

        report.record("Health Check", self.check_health().await);

        let base = happy_payload(&white_png_data_uri()?);
        for scenario in fast_scenarios(&base) {
            let outcome = self.run_scenario(&scenario).await;
            report.record(scenario.name, outcome);
        }

        if skip_slow {
            info!("Skipping slow tests (--skip-slow flag set)");
        } else {
            info!("Running slow tests (model inference required)...");
            for scenario in slow_scenarios(&base) {
                let outcome = self.run_scenario(&scenario).await;
                report.record(scenario.name, outcome);
            }
        }

        Ok(report)
    }
}
