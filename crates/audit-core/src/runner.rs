//! Audit orchestration
//!
//! Runs the fixed profile registry sequentially against the target URL. A
//! profile that fails is logged and omitted from the report; the remaining
//! profiles still run, and the report is written regardless. Only report
//! assembly and artifact writing are fatal to the whole run.

use tracing::{error, info, instrument, warn};

use crate::error::Result;
use crate::har::build_har;
use crate::lighthouse;
use crate::options::AuditOptions;
use crate::profiles::ThrottlingProfile;
use crate::report::{AuditReport, PageRunResult, ProfileReport};
use crate::reporter::OutputWriter;
use crate::session::BrowserSession;

pub struct AuditRunner {
    options: AuditOptions,
}

impl AuditRunner {
    pub fn new(options: AuditOptions) -> Self {
        Self { options }
    }

    /// Run the full audit and write the report.
    #[instrument(skip(self), fields(url = %self.options.target_url))]
    pub async fn run(&self) -> Result<AuditReport> {
        info!("Starting audit of {}", self.options.target_url);
        let mut profiles = Vec::new();

        for profile in ThrottlingProfile::registry() {
            match self.audit_profile(&profile).await {
                Ok(report) => profiles.push(report),
                Err(e) => {
                    error!("Profile '{}' failed, omitting from report: {e}", profile.id);
                }
            }
        }

        let report = AuditReport::assemble(&self.options, profiles);
        OutputWriter::write(&report, &self.options.output_dir)?;
        info!("Audit complete: {} profile(s) reported", report.profiles.len());
        Ok(report)
    }

    /// Audit the target under one profile. The session is torn down on
    /// success and failure alike.
    #[instrument(skip(self, profile), fields(profile = %profile.id))]
    async fn audit_profile(&self, profile: &ThrottlingProfile) -> Result<ProfileReport> {
        let mut session = BrowserSession::start(profile, &self.options).await?;
        let outcome = self.run_page(profile, &mut session).await;
        session.teardown().await;
        let page = outcome?;
        Ok(ProfileReport { profile: profile.clone(), pages: vec![page] })
    }

    async fn run_page(
        &self,
        profile: &ThrottlingProfile,
        session: &mut BrowserSession,
    ) -> Result<PageRunResult> {
        session.apply_throttling().await?;
        let attempts = session.navigate(&self.options).await?;
        session.settle().await;

        let mut snapshot = session.collect_snapshot().await?;
        let (js_coverage, css_coverage) = session.stop_coverage().await?;
        let ledger = session.ledger_snapshot().await;
        let navigations = session.navigations_snapshot().await;
        ledger.annotate_images(&mut snapshot.images);

        let screenshot_png = match session.screenshot().await {
            Ok(png) => png,
            Err(e) => {
                warn!("Screenshot failed for profile '{}': {e}", profile.id);
                Vec::new()
            }
        };

        // The engine run owns its own browser; a failure there leaves the
        // metrics absent without sinking the profile.
        let engine_metrics =
            match lighthouse::run_engine(&self.options.target_url, &profile.engine).await {
                Ok(metrics) => Some(metrics),
                Err(e) => {
                    warn!("Audit engine failed for profile '{}': {e}", profile.id);
                    None
                }
            };

        let har = build_har(&self.options.target_url, &navigations, &ledger);
        let bundle = ledger.bundle_summary();
        let protocol_events = ledger.event_log().to_vec();

        let har_path = Some(self.options.output_dir.join(format!("{}.har", profile.id)));
        let screenshot_path = if screenshot_png.is_empty() {
            None
        } else {
            Some(self.options.output_dir.join(format!("{}-lcp.png", profile.id)))
        };

        Ok(PageRunResult {
            url: self.options.target_url.clone(),
            attempts,
            lighthouse: engine_metrics,
            snapshot,
            bundle,
            js_coverage,
            css_coverage,
            network_entries: ledger.into_entries(),
            protocol_events,
            navigations,
            har_path,
            screenshot_path,
            har,
            screenshot_png,
        })
    }
}
