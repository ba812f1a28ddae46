//! External audit engine adapter
//!
//! Runs the Lighthouse CLI against the target URL under profile-equivalent
//! simulated throttling, attached to a dedicated headless browser this
//! adapter owns. The browser is disposed of on success and failure alike and
//! is fully independent of the instrumentation session's browser.
//!
//! Metric extraction is defensive: a metric the engine did not report stays
//! absent. Zero and "not measured" are never conflated.

use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::error::{AuditError, Result};
use crate::profiles::EngineSettings;

/// Normalized output of one engine run. Every field is optional; absent
/// means the engine did not measure it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LighthouseCoreMetrics {
    pub ttfb_ms: Option<f64>,
    pub first_contentful_paint_ms: Option<f64>,
    pub largest_contentful_paint_ms: Option<f64>,
    pub cumulative_layout_shift: Option<f64>,
    /// Falls back to total blocking time when the engine has no INP.
    pub interaction_to_next_paint_ms: Option<f64>,
    /// Falls back to total blocking time when unavailable.
    pub max_potential_fid_ms: Option<f64>,
    pub time_to_interactive_ms: Option<f64>,
    pub speed_index_ms: Option<f64>,
    pub total_blocking_time_ms: Option<f64>,
    /// Composite performance score in `[0, 1]`.
    pub performance_score: Option<f64>,
}

fn audit_value(report: &Value, id: &str) -> Option<f64> {
    report
        .get("audits")?
        .get(id)?
        .get("numericValue")?
        .as_f64()
}

impl LighthouseCoreMetrics {
    /// Extract the fixed metric set from a raw engine report.
    pub fn from_engine_report(report: &Value) -> Self {
        let tbt = audit_value(report, "total-blocking-time");
        LighthouseCoreMetrics {
            ttfb_ms: audit_value(report, "server-response-time"),
            first_contentful_paint_ms: audit_value(report, "first-contentful-paint"),
            largest_contentful_paint_ms: audit_value(report, "largest-contentful-paint"),
            cumulative_layout_shift: audit_value(report, "cumulative-layout-shift"),
            interaction_to_next_paint_ms: audit_value(report, "interaction-to-next-paint")
                .or(tbt),
            max_potential_fid_ms: audit_value(report, "max-potential-fid").or(tbt),
            time_to_interactive_ms: audit_value(report, "interactive"),
            speed_index_ms: audit_value(report, "speed-index"),
            total_blocking_time_ms: tbt,
            performance_score: report
                .get("categories")
                .and_then(|c| c.get("performance"))
                .and_then(|p| p.get("score"))
                .and_then(Value::as_f64),
        }
    }
}

/// Extract the debugging port from a browser websocket address like
/// `ws://127.0.0.1:9222/devtools/browser/<id>`.
fn debug_port(websocket_address: &str) -> Option<u16> {
    let rest = websocket_address.strip_prefix("ws://")?;
    let authority = rest.split('/').next()?;
    authority.rsplit(':').next()?.parse().ok()
}

/// Run the engine for one profile against the target URL.
///
/// Owns its browser lifecycle: the dedicated browser is closed whether the
/// engine run succeeds or fails.
#[instrument(skip(settings), fields(form_factor = %settings.form_factor))]
pub async fn run_engine(url: &str, settings: &EngineSettings) -> Result<LighthouseCoreMetrics> {
    info!("Launching dedicated browser for the audit engine");
    let config = BrowserConfig::builder()
        .build()
        .map_err(AuditError::Engine)?;
    let (mut browser, mut handler) = Browser::launch(config)
        .await
        .map_err(|e| AuditError::Engine(format!("engine browser launch: {e}")))?;
    let handler_task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if event.is_err() {
                break;
            }
        }
    });

    let outcome = invoke(url, browser.websocket_address(), settings).await;

    if let Err(e) = browser.close().await {
        warn!("Failed to close engine browser: {e}");
    }
    handler_task.abort();

    outcome
}

async fn invoke(
    url: &str,
    websocket_address: &str,
    settings: &EngineSettings,
) -> Result<LighthouseCoreMetrics> {
    let port = debug_port(websocket_address).ok_or_else(|| {
        AuditError::Engine(format!("cannot determine debug port from {websocket_address}"))
    })?;

    let mut command = Command::new("lighthouse");
    command
        .arg(url)
        .arg(format!("--port={port}"))
        .args([
            "--output=json",
            "--output-path=stdout",
            "--quiet",
            "--only-categories=performance",
            "--throttling-method=simulate",
        ])
        .arg(format!("--form-factor={}", settings.form_factor))
        .arg(format!("--throttling.cpuSlowdownMultiplier={}", settings.cpu_slowdown))
        .arg(format!("--throttling.rttMs={}", settings.rtt_ms))
        .arg(format!("--throttling.throughputKbps={}", settings.throughput_kbps));
    if !settings.screen_emulation_mobile {
        command.arg("--screenEmulation.disabled");
    }

    debug!("Invoking audit engine on port {port}");
    let output = command
        .output()
        .await
        .map_err(|e| AuditError::Engine(format!("cannot spawn lighthouse: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AuditError::Engine(format!(
            "lighthouse exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let report: Value = serde_json::from_slice(&output.stdout)
        .map_err(|e| AuditError::Engine(format!("engine report parse: {e}")))?;
    Ok(LighthouseCoreMetrics::from_engine_report(&report))
}
