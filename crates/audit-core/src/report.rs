//! Report aggregation
//!
//! Collects the per-profile results into one [`AuditReport`] and derives the
//! cross-profile summary: slowest LCP, heaviest page weight, and a
//! deduplicated, ordered recommendation list. Metrics that were never
//! measured stay absent in the summary rather than collapsing to zero.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::coverage::CoverageSummary;
use crate::har::Har;
use crate::lighthouse::LighthouseCoreMetrics;
use crate::network::{BundleSummary, NavigationRecord, NetworkLogEntry, ProtocolEventRecord};
use crate::options::AuditOptions;
use crate::profiles::ThrottlingProfile;
use crate::snapshot::PageSnapshot;

/// LCP above this many milliseconds is flagged.
pub const LCP_THRESHOLD_MS: f64 = 2500.0;
/// CLS above this is flagged.
pub const CLS_THRESHOLD: f64 = 0.1;
/// A main-thread task longer than this many milliseconds is flagged.
pub const LONG_TASK_THRESHOLD_MS: f64 = 100.0;
/// More than this fraction of shipped JS or CSS going unused is flagged.
pub const UNUSED_RATIO_THRESHOLD: f64 = 0.5;

/// Everything measured for one page under one profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRunResult {
    pub url: String,
    /// Navigation attempts used (1 means no retry was needed).
    pub attempts: u32,
    pub lighthouse: Option<LighthouseCoreMetrics>,
    pub snapshot: PageSnapshot,
    pub bundle: BundleSummary,
    pub js_coverage: CoverageSummary,
    pub css_coverage: CoverageSummary,
    pub network_entries: Vec<NetworkLogEntry>,
    pub protocol_events: Vec<ProtocolEventRecord>,
    pub navigations: Vec<NavigationRecord>,
    pub har_path: Option<PathBuf>,
    pub screenshot_path: Option<PathBuf>,
    /// Carried for the writer, not serialized into the report body.
    #[serde(skip)]
    pub har: Har,
    #[serde(skip)]
    pub screenshot_png: Vec<u8>,
}

/// All pages audited under one throttling profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileReport {
    pub profile: ThrottlingProfile,
    pub pages: Vec<PageRunResult>,
}

/// Cross-profile rollup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSummary {
    /// Worst engine-reported LCP across all profiles; absent when no profile
    /// produced one.
    pub slowest_lcp_ms: Option<f64>,
    /// Largest total transferred bytes across all profile runs.
    pub heaviest_page_bytes: Option<u64>,
    pub recommendations: Vec<String>,
}

/// The complete audit output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub target_url: String,
    pub generated_at: String,
    pub options: AuditOptions,
    pub profiles: Vec<ProfileReport>,
    pub summary: AuditSummary,
}

impl AuditReport {
    /// Assemble the final report from the per-profile results.
    pub fn assemble(options: &AuditOptions, profiles: Vec<ProfileReport>) -> Self {
        let summary = summarize(&profiles);
        AuditReport {
            target_url: options.target_url.clone(),
            generated_at: Utc::now().to_rfc3339(),
            options: options.clone(),
            profiles,
            summary,
        }
    }
}

fn summarize(profiles: &[ProfileReport]) -> AuditSummary {
    let mut slowest_lcp_ms: Option<f64> = None;
    let mut heaviest_page_bytes: Option<u64> = None;
    // BTreeSet gives dedup and a stable order in one move.
    let mut recommendations = BTreeSet::new();

    for profile in profiles {
        for page in &profile.pages {
            let lcp = page
                .lighthouse
                .as_ref()
                .and_then(|m| m.largest_contentful_paint_ms);
            if let Some(lcp) = lcp {
                slowest_lcp_ms = Some(slowest_lcp_ms.map_or(lcp, |s: f64| s.max(lcp)));
                if lcp > LCP_THRESHOLD_MS {
                    recommendations.insert(
                        "Largest Contentful Paint exceeds 2.5s; prioritize loading of the \
                         LCP element and reduce render-blocking resources"
                            .to_string(),
                    );
                }
            }

            heaviest_page_bytes = Some(
                heaviest_page_bytes.map_or(page.bundle.total, |h| h.max(page.bundle.total)),
            );

            let cls = page
                .lighthouse
                .as_ref()
                .and_then(|m| m.cumulative_layout_shift)
                .unwrap_or_else(|| page.snapshot.cumulative_layout_shift());
            if cls > CLS_THRESHOLD {
                recommendations.insert(
                    "Cumulative Layout Shift exceeds 0.1; reserve space for images, ads, \
                     and late-loading content"
                        .to_string(),
                );
            }

            if page
                .snapshot
                .longest_task()
                .is_some_and(|d| d > LONG_TASK_THRESHOLD_MS)
            {
                recommendations.insert(
                    "Long main-thread tasks detected; split or defer heavy script work"
                        .to_string(),
                );
            }

            if page.js_coverage.total_bytes > 0
                && page.js_coverage.unused_ratio() > UNUSED_RATIO_THRESHOLD
            {
                recommendations.insert(
                    "Over half of shipped JavaScript is unused; code-split and remove \
                     dead bundles"
                        .to_string(),
                );
            }
            if page.css_coverage.total_bytes > 0
                && page.css_coverage.unused_ratio() > UNUSED_RATIO_THRESHOLD
            {
                recommendations.insert(
                    "Over half of shipped CSS is unused; prune unused rules or split \
                     stylesheets"
                        .to_string(),
                );
            }

            if page.snapshot.images.iter().any(|i| !i.responsive) {
                recommendations.insert(
                    "Images without responsive markup found; add srcset or <picture> \
                     variants"
                        .to_string(),
                );
            }
        }
    }

    AuditSummary {
        slowest_lcp_ms,
        heaviest_page_bytes,
        recommendations: recommendations.into_iter().collect(),
    }
}
