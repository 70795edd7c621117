//! Error taxonomy shared by every Flowhook crate.

use crate::flow::HookEventType;

/// Flowhook error type.
#[derive(Debug, thiserror::Error)]
pub enum FlowhookError {
    /// A condition string could not be parsed. Never reaches the flow path.
    #[error("Rule parse error: {0}")]
    RuleParse(String),

    /// A hook handler failed. Contained at the dispatch boundary.
    #[error("Handler of addon '{addon}' failed on {event}: {reason}")]
    HandlerExecution {
        addon: String,
        event: HookEventType,
        reason: String,
    },

    /// A scheduled job failed. The job stays scheduled.
    #[error("Job '{job}' failed: {reason}")]
    JobExecution { job: String, reason: String },

    /// A trigger specification was rejected at registration.
    #[error("Invalid trigger: {0}")]
    Trigger(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Addon error: {0}")]
    Addon(String),

    /// The dispatcher no longer accepts new flows.
    #[error("Engine is shutting down")]
    ShuttingDown,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl FlowhookError {
    /// Shorthand for ad-hoc failures raised inside handlers and jobs.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// Human-readable reason for a caught panic payload.
pub fn panic_reason(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

/// Result type alias for Flowhook operations.
pub type Result<T> = std::result::Result<T, FlowhookError>;
