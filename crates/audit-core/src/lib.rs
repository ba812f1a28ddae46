//! Headless-browser performance audit harness.
//!
//! Audits a single target URL under a fixed registry of device/connection
//! profiles. Each profile gets its own instrumented browser session (CPU and
//! network throttling, in-page observers, network recording, JS/CSS coverage)
//! plus an independent Lighthouse run under equivalent simulated throttling.
//! Results are aggregated into one report written as JSON and markdown,
//! alongside per-profile traffic captures and screenshots.
//!
//! Profiles run sequentially; a profile that fails is logged and omitted from
//! the report without aborting the rest of the audit.

pub mod coverage;
pub mod error;
pub mod har;
pub mod lighthouse;
pub mod network;
pub mod options;
pub mod profiles;
pub mod report;
pub mod reporter;
pub mod runner;
pub mod session;
pub mod snapshot;
pub mod throttling;

pub use error::{AuditError, Result};
pub use options::AuditOptions;
pub use profiles::ThrottlingProfile;
pub use report::{AuditReport, PageRunResult, ProfileReport};
pub use runner::AuditRunner;
