//! Resolved invocation options
//!
//! Argument parsing lives in the CLI; this module owns validation and
//! normalization of the raw inputs into an immutable [`AuditOptions`] value
//! that the rest of the pipeline borrows read-only.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{AuditError, Result};

/// Environment variable consulted when no target URL is passed explicitly.
pub const TARGET_URL_ENV: &str = "AUDIT_TARGET_URL";

/// Upper bound on the recorded URL-change history per profile.
pub const MAX_NAVIGATIONS_CAP: u32 = 10;

/// Validated audit options, immutable once resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditOptions {
    /// Target page URL.
    pub target_url: String,
    /// Maximum number of pages audited per profile.
    pub max_pages: u32,
    /// Maximum number of URL changes recorded per profile (clamped to 10).
    pub max_navigations: u32,
    /// Directory all artifacts are written into; created if absent.
    pub output_dir: PathBuf,
    /// Additional navigation attempts after the first failure.
    pub retries: u32,
    /// Per-attempt navigation timeout in milliseconds.
    pub nav_timeout_ms: u64,
}

impl AuditOptions {
    /// Validate raw inputs into an [`AuditOptions`].
    ///
    /// The target URL falls back to the [`TARGET_URL_ENV`] environment
    /// variable when not passed explicitly. `max_navigations` is silently
    /// clamped to [`MAX_NAVIGATIONS_CAP`]; the output directory is resolved
    /// to an absolute path.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Config`] when the target URL is missing or
    /// empty, when `max_pages` is zero, or when the navigation timeout is
    /// zero.
    pub fn resolve(
        target_url: Option<String>,
        max_pages: u32,
        max_navigations: u32,
        output_dir: impl Into<PathBuf>,
        retries: u32,
        nav_timeout_ms: u64,
    ) -> Result<Self> {
        let target_url = target_url
            .or_else(|| std::env::var(TARGET_URL_ENV).ok())
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                AuditError::Config(format!(
                    "target URL is required (pass it explicitly or set {TARGET_URL_ENV})"
                ))
            })?;

        if max_pages == 0 {
            return Err(AuditError::Config("max pages must be at least 1".into()));
        }
        if nav_timeout_ms == 0 {
            return Err(AuditError::Config(
                "navigation timeout must be non-zero".into(),
            ));
        }

        let output_dir = output_dir.into();
        let output_dir = if output_dir.is_absolute() {
            output_dir
        } else {
            std::env::current_dir()
                .map_err(|e| AuditError::Config(format!("cannot resolve output directory: {e}")))?
                .join(output_dir)
        };

        Ok(Self {
            target_url,
            max_pages,
            max_navigations: max_navigations.min(MAX_NAVIGATIONS_CAP),
            output_dir,
            retries,
            nav_timeout_ms,
        })
    }

    /// Total navigation attempts: the first try plus `retries`, saturating
    /// so a huge retry count cannot wrap.
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_navigations_clamped() {
        let options =
            AuditOptions::resolve(Some("https://example.com".into()), 1, 50, "/tmp/out", 2, 30_000)
                .unwrap();
        assert_eq!(options.max_navigations, 10);
    }

    #[test]
    fn test_max_navigations_below_cap_unchanged() {
        let options =
            AuditOptions::resolve(Some("https://example.com".into()), 1, 3, "/tmp/out", 2, 30_000)
                .unwrap();
        assert_eq!(options.max_navigations, 3);
    }

    // Both cases touching the environment live in one test so parallel
    // execution cannot interleave set/remove of the fallback variable.
    #[test]
    fn test_url_environment_fallback_and_missing_url() {
        std::env::remove_var(TARGET_URL_ENV);
        let err = AuditOptions::resolve(None, 1, 3, "/tmp/out", 2, 30_000).unwrap_err();
        assert!(matches!(err, AuditError::Config(_)));

        std::env::set_var(TARGET_URL_ENV, "https://env.example.com");
        let options = AuditOptions::resolve(None, 1, 3, "/tmp/out", 2, 30_000).unwrap();
        assert_eq!(options.target_url, "https://env.example.com");
        std::env::remove_var(TARGET_URL_ENV);
    }

    #[test]
    fn test_empty_url_is_config_error() {
        let err = AuditOptions::resolve(Some("   ".into()), 1, 3, "/tmp/out", 2, 30_000)
            .unwrap_err();
        assert!(matches!(err, AuditError::Config(_)));
    }

    #[test]
    fn test_zero_max_pages_rejected() {
        let err =
            AuditOptions::resolve(Some("https://example.com".into()), 0, 3, "/tmp/out", 2, 30_000)
                .unwrap_err();
        assert!(matches!(err, AuditError::Config(_)));
    }

    #[test]
    fn test_max_attempts_saturates_on_huge_retry_count() {
        let options = AuditOptions::resolve(
            Some("https://example.com".into()),
            1,
            3,
            "/tmp/out",
            u32::MAX,
            30_000,
        )
        .unwrap();
        assert_eq!(options.max_attempts(), u32::MAX);

        let options =
            AuditOptions::resolve(Some("https://example.com".into()), 1, 3, "/tmp/out", 2, 30_000)
                .unwrap();
        assert_eq!(options.max_attempts(), 3);
    }

    #[test]
    fn test_relative_output_dir_becomes_absolute() {
        let options =
            AuditOptions::resolve(Some("https://example.com".into()), 1, 3, "audit-out", 2, 30_000)
                .unwrap();
        assert!(options.output_dir.is_absolute());
        assert!(options.output_dir.ends_with("audit-out"));
    }
}
