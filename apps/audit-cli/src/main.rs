//! page-audit - headless performance audit of a single URL
//!
//! Runs the target through every throttling profile, collects in-page
//! metrics, network traffic, JS/CSS coverage, and Lighthouse results, and
//! writes a JSON + markdown report with per-profile artifacts.

use anyhow::Result;
use clap::Parser;
use tracing::info;

use audit_core::{AuditOptions, AuditRunner};

#[derive(Parser, Debug)]
#[command(name = "page-audit", about = "Headless-browser performance audit harness")]
struct Cli {
    /// Target URL; falls back to AUDIT_TARGET_URL when omitted.
    url: Option<String>,

    /// Maximum pages audited per profile.
    #[arg(long, default_value_t = 1)]
    max_pages: u32,

    /// Maximum tracked URL changes per session (capped at 10).
    #[arg(long, default_value_t = 3)]
    max_navigations: u32,

    /// Directory for the report and artifacts.
    #[arg(long, default_value = "audit-output")]
    out_dir: String,

    /// Extra navigation attempts after the first failure.
    #[arg(long, default_value_t = 2)]
    retries: u32,

    /// Per-attempt navigation timeout in milliseconds.
    #[arg(long, default_value_t = 45_000)]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let options = AuditOptions::resolve(
        cli.url,
        cli.max_pages,
        cli.max_navigations,
        cli.out_dir,
        cli.retries,
        cli.timeout_ms,
    )?;

    let report = AuditRunner::new(options).run().await?;
    info!(
        "Done: {} profile(s), {} recommendation(s)",
        report.profiles.len(),
        report.summary.recommendations.len()
    );
    Ok(())
}
