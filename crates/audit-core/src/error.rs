use thiserror::Error;

/// Errors produced by the audit harness.
///
/// The variants mirror the failure boundaries of the pipeline: configuration
/// problems abort before any browser work, launch/navigation/instrumentation
/// failures abandon the affected profile, and write failures abort the whole
/// invocation so a partial report is never persisted.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("navigation to {url} failed after {attempts} attempts: {reason}")]
    Navigation {
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("instrumentation failed: {0}")]
    Instrumentation(String),

    #[error("audit engine failed: {0}")]
    Engine(String),

    #[error("failed to write report artifacts: {0}")]
    Write(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AuditError>;
