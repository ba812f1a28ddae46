//! Browser session management
//!
//! One [`BrowserSession`] per profile: it launches an isolated browser,
//! enables every instrumentation domain *before* throttling and navigation
//! (so early network and paint events are not lost), wires the network and
//! navigation listeners into per-session state, performs the retried
//! navigation, and guarantees teardown on success and failure paths alike.

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    self, EventLoadingFinished, EventRequestWillBeSent, EventResponseReceived, Headers,
};
use chromiumoxide::cdp::browser_protocol::page::{
    self, CaptureScreenshotFormat, EventFrameNavigated,
};
use chromiumoxide::cdp::browser_protocol::performance;
use chromiumoxide::cdp::js_protocol::runtime;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use chrono::Utc;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::coverage::{CoverageSummary, CoverageTracker};
use crate::error::{AuditError, Result};
use crate::network::{NavigationRecord, NetworkEvent, NetworkLedger};
use crate::options::AuditOptions;
use crate::profiles::ThrottlingProfile;
use crate::snapshot::{InstrumentationCollector, PageSnapshot};
use crate::throttling::{CpuThrottler, NetworkThrottler};

/// Delay after navigation settles, letting late paints, shifts, and
/// animations register before the snapshot.
pub const SETTLE_DELAY: Duration = Duration::from_millis(1500);

/// Flatten protocol header objects into a string map.
fn headers_to_map(headers: &Headers) -> BTreeMap<String, String> {
    serde_json::to_value(headers)
        .ok()
        .and_then(|value| match value {
            serde_json::Value::Object(map) => Some(
                map.into_iter()
                    .map(|(name, value)| {
                        let value = value
                            .as_str()
                            .map(str::to_string)
                            .unwrap_or_else(|| value.to_string());
                        (name, value)
                    })
                    .collect(),
            ),
            _ => None,
        })
        .unwrap_or_default()
}

/// One fully instrumented page session for one profile.
pub struct BrowserSession {
    profile: ThrottlingProfile,
    browser: Browser,
    handler_task: JoinHandle<()>,
    page: Page,
    ledger: Arc<Mutex<NetworkLedger>>,
    navigations: Arc<Mutex<Vec<NavigationRecord>>>,
    listeners: Vec<JoinHandle<()>>,
    coverage: CoverageTracker,
}

impl BrowserSession {
    /// Launch the browser and fully instrument a fresh page.
    ///
    /// Domain enabling, coverage start, the observer script, and the event
    /// listeners are all in place when this returns, so throttling and
    /// navigation can follow without losing events.
    #[instrument(skip(profile, options), fields(profile = %profile.id))]
    pub async fn start(profile: &ThrottlingProfile, options: &AuditOptions) -> Result<Self> {
        info!("Launching browser for profile '{}'", profile.id);

        let mut builder = BrowserConfig::builder().arg("--lang=en-US");
        if let Some(device) = &profile.device {
            builder = builder.window_size(device.width, device.height);
        }
        // Unique user data dir so sequential profile runs never share state.
        let user_data_dir = std::env::temp_dir().join(format!(
            "page-audit-{}-{}-{}",
            profile.id,
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        builder = builder.user_data_dir(user_data_dir);

        let config = builder.build().map_err(AuditError::Launch)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AuditError::Launch(e.to_string()))?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| AuditError::Launch(e.to_string()))?;

        let mut session = BrowserSession {
            profile: profile.clone(),
            browser,
            handler_task,
            page,
            ledger: Arc::new(Mutex::new(NetworkLedger::new())),
            navigations: Arc::new(Mutex::new(Vec::new())),
            listeners: Vec::new(),
            coverage: CoverageTracker::new(),
        };

        if let Err(e) = session.instrument(options).await {
            session.teardown().await;
            return Err(e);
        }
        Ok(session)
    }

    async fn instrument(&mut self, options: &AuditOptions) -> Result<()> {
        debug!("Enabling protocol domains");
        self.page
            .execute(page::EnableParams::default())
            .await
            .map_err(|e| AuditError::Instrumentation(e.to_string()))?;
        self.page
            .execute(network::EnableParams::default())
            .await
            .map_err(|e| AuditError::Instrumentation(e.to_string()))?;
        self.page
            .execute(performance::EnableParams::default())
            .await
            .map_err(|e| AuditError::Instrumentation(e.to_string()))?;
        self.page
            .execute(runtime::EnableParams::default())
            .await
            .map_err(|e| AuditError::Instrumentation(e.to_string()))?;

        self.coverage.start(&self.page).await?;

        if let Some(device) = &self.profile.device {
            debug!("Applying device emulation");
            let metrics = SetDeviceMetricsOverrideParams::builder()
                .width(device.width as i64)
                .height(device.height as i64)
                .device_scale_factor(device.device_scale_factor)
                .mobile(device.mobile)
                .build()
                .map_err(AuditError::Instrumentation)?;
            self.page
                .execute(metrics)
                .await
                .map_err(|e| AuditError::Instrumentation(e.to_string()))?;
            self.page
                .execute(SetUserAgentOverrideParams::new(device.user_agent.clone()))
                .await
                .map_err(|e| AuditError::Instrumentation(e.to_string()))?;
        }

        InstrumentationCollector::install(&self.page).await?;
        self.register_network_listeners().await?;
        self.register_navigation_listener(options.max_navigations as usize)
            .await?;
        Ok(())
    }

    async fn register_network_listeners(&mut self) -> Result<()> {
        let mut requests = self
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(|e| AuditError::Instrumentation(e.to_string()))?;
        let ledger = self.ledger.clone();
        self.listeners.push(tokio::spawn(async move {
            while let Some(event) = requests.next().await {
                ledger.lock().await.record(NetworkEvent::RequestWillBeSent {
                    request_id: event.request_id.inner().clone(),
                    url: event.request.url.clone(),
                    method: event.request.method.clone(),
                    headers: headers_to_map(&event.request.headers),
                    at: Utc::now(),
                });
            }
        }));

        let mut responses = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| AuditError::Instrumentation(e.to_string()))?;
        let ledger = self.ledger.clone();
        self.listeners.push(tokio::spawn(async move {
            while let Some(event) = responses.next().await {
                let mime = event.response.mime_type.clone();
                ledger.lock().await.record(NetworkEvent::ResponseReceived {
                    request_id: event.request_id.inner().clone(),
                    status: event.response.status,
                    headers: headers_to_map(&event.response.headers),
                    mime_type: if mime.is_empty() { None } else { Some(mime) },
                    at: Utc::now(),
                });
            }
        }));

        let mut finished = self
            .page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(|e| AuditError::Instrumentation(e.to_string()))?;
        let ledger = self.ledger.clone();
        self.listeners.push(tokio::spawn(async move {
            while let Some(event) = finished.next().await {
                ledger.lock().await.record(NetworkEvent::LoadingFinished {
                    request_id: event.request_id.inner().clone(),
                    encoded_data_length: event.encoded_data_length.max(0.0) as u64,
                    at: Utc::now(),
                });
            }
        }));

        Ok(())
    }

    async fn register_navigation_listener(&mut self, max_navigations: usize) -> Result<()> {
        let mut navigated = self
            .page
            .event_listener::<EventFrameNavigated>()
            .await
            .map_err(|e| AuditError::Instrumentation(e.to_string()))?;
        let navigations = self.navigations.clone();
        self.listeners.push(tokio::spawn(async move {
            while let Some(event) = navigated.next().await {
                // Top-level frame only.
                if event.frame.parent_id.is_some() {
                    continue;
                }
                let mut history = navigations.lock().await;
                if history.len() < max_navigations {
                    history.push(NavigationRecord {
                        url: event.frame.url.clone(),
                        at: Utc::now(),
                    });
                }
            }
        }));
        Ok(())
    }

    /// Apply the profile's CPU and (if present) network throttling.
    ///
    /// Must run after [`BrowserSession::start`] and before
    /// [`BrowserSession::navigate`]. A profile without network parameters
    /// stays unthrottled.
    pub async fn apply_throttling(&self) -> Result<()> {
        CpuThrottler::apply(&self.page, self.profile.cpu_slowdown).await?;
        if let Some(conditions) = &self.profile.network {
            NetworkThrottler::apply(&self.page, conditions).await?;
        }
        Ok(())
    }

    /// Navigate to the target, waiting for network quiescence, bounded by
    /// the configured timeout and retried up to `options.retries` extra
    /// attempts.
    ///
    /// Returns the number of attempts used.
    #[instrument(skip(self, options), fields(profile = %self.profile.id))]
    pub async fn navigate(&self, options: &AuditOptions) -> Result<u32> {
        let timeout = Duration::from_millis(options.nav_timeout_ms);
        let max_attempts = options.max_attempts();
        let mut last_failure = String::new();

        for attempt in 1..=max_attempts {
            debug!("Navigation attempt {attempt} to {}", options.target_url);
            let result = tokio::time::timeout(timeout, async {
                self.page.goto(options.target_url.as_str()).await?;
                self.page.wait_for_navigation().await?;
                Ok::<(), chromiumoxide::error::CdpError>(())
            })
            .await;

            match result {
                Ok(Ok(())) => {
                    info!("Navigation succeeded on attempt {attempt}");
                    return Ok(attempt);
                }
                Ok(Err(e)) => {
                    warn!("Navigation attempt {attempt} failed: {e}");
                    last_failure = e.to_string();
                }
                Err(_) => {
                    warn!("Navigation attempt {attempt} timed out after {timeout:?}");
                    last_failure = format!("timed out after {timeout:?}");
                }
            }
        }

        Err(AuditError::Navigation {
            url: options.target_url.clone(),
            attempts: max_attempts,
            reason: last_failure,
        })
    }

    /// Let late paints and animations register before the snapshot.
    pub async fn settle(&self) {
        tokio::time::sleep(SETTLE_DELAY).await;
    }

    /// Take the single read-only in-page snapshot.
    pub async fn collect_snapshot(&self) -> Result<PageSnapshot> {
        InstrumentationCollector::collect(&self.page).await
    }

    /// Stop coverage tracking and reduce it into (JS, CSS) summaries.
    pub async fn stop_coverage(&mut self) -> Result<(CoverageSummary, CoverageSummary)> {
        let page = self.page.clone();
        self.coverage.stop(&page).await
    }

    /// Full-page PNG screenshot of the settled page.
    pub async fn screenshot(&self) -> Result<Vec<u8>> {
        self.page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .full_page(true)
                    .build(),
            )
            .await
            .map_err(|e| AuditError::Instrumentation(e.to_string()))
    }

    /// Read-only copy of the request ledger as observed so far.
    pub async fn ledger_snapshot(&self) -> NetworkLedger {
        self.ledger.lock().await.clone()
    }

    /// Read-only copy of the observed URL-change history.
    pub async fn navigations_snapshot(&self) -> Vec<NavigationRecord> {
        self.navigations.lock().await.clone()
    }

    /// Close everything, unconditionally. Safe to call on failure paths;
    /// errors during close are logged, not propagated.
    pub async fn teardown(mut self) {
        debug!("Tearing down session for profile '{}'", self.profile.id);
        for listener in self.listeners.drain(..) {
            listener.abort();
        }
        if let Err(e) = self.page.close().await {
            warn!("Failed to close page: {e}");
        }
        if let Err(e) = self.browser.close().await {
            warn!("Failed to close browser: {e}");
        }
        self.handler_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_headers_flattened_to_string_map() {
        let headers = Headers::new(json!({
            "content-type": "text/html",
            "content-length": 42
        }));
        let map = headers_to_map(&headers);
        assert_eq!(map.get("content-type").unwrap(), "text/html");
        assert_eq!(map.get("content-length").unwrap(), "42");
    }

    #[test]
    fn test_non_object_headers_become_empty_map() {
        let headers = Headers::new(json!("bogus"));
        assert!(headers_to_map(&headers).is_empty());
    }
}
