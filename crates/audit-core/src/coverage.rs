//! Script and stylesheet usage tracking
//!
//! Starts precise per-function script coverage (`Profiler`) and per-rule
//! stylesheet usage tracking (`CSS`) before navigation, collects the raw
//! reports plus captured source text after the measurement window, and
//! reduces them into used/unused byte totals per source file.
//!
//! Reduction invariants: per-file `unused = max(total - used, 0)`, per-file
//! `used <= total`, and the aggregate totals are exact sums over the file
//! list. Files whose source could not be captured are recorded with zero
//! total/used rather than omitted, so the sums stay consistent.

use chromiumoxide::cdp::browser_protocol::css::{
    self, EventStyleSheetAdded, GetStyleSheetTextParams, StartRuleUsageTrackingParams,
    StopRuleUsageTrackingParams, StyleSheetId,
};
use chromiumoxide::cdp::browser_protocol::dom;
use chromiumoxide::cdp::js_protocol::debugger::{self, GetScriptSourceParams};
use chromiumoxide::cdp::js_protocol::profiler::{
    self, StartPreciseCoverageParams, StopPreciseCoverageParams, TakePreciseCoverageParams,
};
use chromiumoxide::Page;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::error::{AuditError, Result};

/// Used/unused byte breakdown for one source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCoverage {
    pub url: String,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub unused_bytes: u64,
}

/// Aggregate coverage for one source kind (scripts or stylesheets).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageSummary {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub unused_bytes: u64,
    pub files: Vec<FileCoverage>,
}

/// Raw per-file input to the reduction: captured source length (absent when
/// the source could not be fetched) plus covered byte ranges.
#[derive(Debug, Clone)]
pub struct SourceCoverage {
    pub url: String,
    pub source_len: Option<u64>,
    pub used_ranges: Vec<(u64, u64)>,
}

impl CoverageSummary {
    /// Reduce raw per-file coverage into the summary.
    pub fn from_sources(sources: Vec<SourceCoverage>) -> Self {
        let files: Vec<FileCoverage> = sources
            .into_iter()
            .map(|source| {
                let total = source.source_len.unwrap_or(0);
                let raw_used: u64 = source
                    .used_ranges
                    .iter()
                    .map(|(start, end)| end.saturating_sub(*start))
                    .sum();
                // Nested coverage ranges can overlap; clamp so used <= total.
                let used = raw_used.min(total);
                FileCoverage {
                    url: source.url,
                    total_bytes: total,
                    used_bytes: used,
                    unused_bytes: total - used,
                }
            })
            .collect();

        let total_bytes = files.iter().map(|f| f.total_bytes).sum();
        let used_bytes = files.iter().map(|f| f.used_bytes).sum();
        CoverageSummary {
            total_bytes,
            used_bytes,
            unused_bytes: total_bytes.saturating_sub(used_bytes),
            files,
        }
    }

    /// Fraction of shipped bytes that went unused; 0 for an empty summary.
    pub fn unused_ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.unused_bytes as f64 / self.total_bytes as f64
        }
    }
}

#[derive(Debug, Clone)]
struct StyleSheetMeta {
    id: StyleSheetId,
    source_url: String,
}

/// Session-scoped coverage tracking. One tracker per browser session,
/// started before navigation and stopped once the page has settled.
pub struct CoverageTracker {
    stylesheets: Arc<Mutex<Vec<StyleSheetMeta>>>,
    listener: Option<JoinHandle<()>>,
}

impl CoverageTracker {
    pub fn new() -> Self {
        Self { stylesheets: Arc::new(Mutex::new(Vec::new())), listener: None }
    }

    /// Enable the coverage domains and begin tracking.
    ///
    /// Must complete before throttling and navigation so no early script
    /// execution or rule application is missed.
    #[instrument(skip(self, page))]
    pub async fn start(&mut self, page: &Page) -> Result<()> {
        debug!("Starting script and stylesheet coverage tracking");

        page.execute(profiler::EnableParams::default())
            .await
            .map_err(|e| AuditError::Instrumentation(e.to_string()))?;
        page.execute(debugger::EnableParams::default())
            .await
            .map_err(|e| AuditError::Instrumentation(e.to_string()))?;

        let mut precise = StartPreciseCoverageParams::default();
        precise.call_count = Some(false);
        precise.detailed = Some(true);
        page.execute(precise)
            .await
            .map_err(|e| AuditError::Instrumentation(e.to_string()))?;

        page.execute(dom::EnableParams::default())
            .await
            .map_err(|e| AuditError::Instrumentation(e.to_string()))?;
        page.execute(css::EnableParams::default())
            .await
            .map_err(|e| AuditError::Instrumentation(e.to_string()))?;

        // Subscribe before starting rule tracking so no sheet is missed.
        let mut added = page
            .event_listener::<EventStyleSheetAdded>()
            .await
            .map_err(|e| AuditError::Instrumentation(e.to_string()))?;
        let stylesheets = self.stylesheets.clone();
        self.listener = Some(tokio::spawn(async move {
            while let Some(event) = added.next().await {
                stylesheets.lock().await.push(StyleSheetMeta {
                    id: event.header.style_sheet_id.clone(),
                    source_url: event.header.source_url.clone(),
                });
            }
        }));

        page.execute(StartRuleUsageTrackingParams::default())
            .await
            .map_err(|e| AuditError::Instrumentation(e.to_string()))?;

        Ok(())
    }

    /// Stop tracking and reduce the raw reports into summaries.
    #[instrument(skip(self, page))]
    pub async fn stop(&mut self, page: &Page) -> Result<(CoverageSummary, CoverageSummary)> {
        let js = self.collect_scripts(page).await?;
        let css = self.collect_stylesheets(page).await?;
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        Ok((js, css))
    }

    async fn collect_scripts(&self, page: &Page) -> Result<CoverageSummary> {
        let taken = page
            .execute(TakePreciseCoverageParams::default())
            .await
            .map_err(|e| AuditError::Instrumentation(e.to_string()))?;

        let mut sources = Vec::new();
        for script in &taken.result.result {
            if script.url.is_empty() {
                continue;
            }
            let source_len = match page
                .execute(GetScriptSourceParams::new(script.script_id.clone()))
                .await
            {
                Ok(resp) => Some(resp.script_source.len() as u64),
                Err(e) => {
                    warn!(url = %script.url, error = %e, "script source not capturable");
                    None
                }
            };
            let used_ranges = script
                .functions
                .iter()
                .flat_map(|f| f.ranges.iter())
                .filter(|r| r.count > 0)
                .map(|r| (r.start_offset.max(0) as u64, r.end_offset.max(0) as u64))
                .collect();
            sources.push(SourceCoverage {
                url: script.url.clone(),
                source_len,
                used_ranges,
            });
        }

        page.execute(StopPreciseCoverageParams::default())
            .await
            .map_err(|e| AuditError::Instrumentation(e.to_string()))?;

        Ok(CoverageSummary::from_sources(sources))
    }

    async fn collect_stylesheets(&self, page: &Page) -> Result<CoverageSummary> {
        let stopped = page
            .execute(StopRuleUsageTrackingParams::default())
            .await
            .map_err(|e| AuditError::Instrumentation(e.to_string()))?;

        let metas = self.stylesheets.lock().await.clone();
        let mut sources = Vec::new();
        for meta in &metas {
            if meta.source_url.is_empty() {
                continue;
            }
            let source_len = match page
                .execute(GetStyleSheetTextParams::new(meta.id.clone()))
                .await
            {
                Ok(resp) => Some(resp.text.len() as u64),
                Err(e) => {
                    warn!(url = %meta.source_url, error = %e, "stylesheet text not capturable");
                    None
                }
            };
            let used_ranges = stopped
                .rule_usage
                .iter()
                .filter(|usage| usage.used && usage.style_sheet_id == meta.id)
                .map(|usage| (usage.start_offset.max(0.0) as u64, usage.end_offset.max(0.0) as u64))
                .collect();
            sources.push(SourceCoverage {
                url: meta.source_url.clone(),
                source_len,
                used_ranges,
            });
        }

        Ok(CoverageSummary::from_sources(sources))
    }
}

impl Default for CoverageTracker {
    fn default() -> Self {
        Self::new()
    }
}
