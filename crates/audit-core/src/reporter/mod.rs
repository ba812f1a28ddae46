//! Report output
//!
//! Writes the finished audit to disk: `report.json` (the full machine
//! readable report), `report.md` (the human summary), plus the per-profile
//! traffic captures and screenshots. Any write failure is fatal to the run.

use std::path::Path;
use tracing::{info, instrument};

use crate::error::Result;
use crate::report::AuditReport;

pub mod markdown;

pub struct OutputWriter;

impl OutputWriter {
    /// Write every artifact of the report under `out_dir`, creating the
    /// directory if needed. Artifact paths recorded in the report are
    /// honored as written.
    #[instrument(skip(report))]
    pub fn write(report: &AuditReport, out_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(out_dir)?;

        for profile in &report.profiles {
            for page in &profile.pages {
                if let Some(path) = &page.har_path {
                    std::fs::write(path, serde_json::to_string_pretty(&page.har)?)?;
                }
                if let Some(path) = &page.screenshot_path {
                    std::fs::write(path, &page.screenshot_png)?;
                }
            }
        }

        let json_path = out_dir.join("report.json");
        std::fs::write(&json_path, serde_json::to_string_pretty(report)?)?;

        let md_path = out_dir.join("report.md");
        std::fs::write(&md_path, markdown::render(report))?;

        info!(
            "Report written to {} and {}",
            json_path.display(),
            md_path.display()
        );
        Ok(())
    }
}
