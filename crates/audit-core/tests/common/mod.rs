//! Shared test helpers.

use audit_core::AuditError;

/// True when the error means no Chrome binary could be found, which is an
/// environment limitation rather than a test failure.
pub fn chrome_missing(err: &AuditError) -> bool {
    matches!(err, AuditError::Launch(msg) if msg.contains("Could not auto detect"))
}

/// Check if browser tests should be skipped explicitly.
pub fn should_skip() -> bool {
    std::env::var("SKIP_BROWSER_TESTS").is_ok()
}
