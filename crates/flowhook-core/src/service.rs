//! Service descriptors — jobs an addon asks the scheduler to run.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::handler::HandlerCall;

/// Keyword arguments bound to a job at registration.
pub type Kwargs = serde_json::Map<String, serde_json::Value>;

/// Raw trigger parameters as declared by an addon.
///
/// The scheduler validates these once at registration; an invalid cron
/// expression is rejected there, not at first fire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "lowercase")]
pub enum TriggerSpec {
    /// Five-field cron expression: `MIN HOUR DOM MON DOW`.
    Cron { expression: String },
    /// Fixed interval in seconds.
    Interval { every_secs: u64 },
    /// One-shot run at a fixed instant.
    Date { at: DateTime<Utc> },
}

impl TriggerSpec {
    pub fn cron(expression: &str) -> Self {
        TriggerSpec::Cron {
            expression: expression.to_string(),
        }
    }

    pub fn interval(every_secs: u64) -> Self {
        TriggerSpec::Interval { every_secs }
    }

    pub fn date(at: DateTime<Utc>) -> Self {
        TriggerSpec::Date { at }
    }
}

impl std::fmt::Display for TriggerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerSpec::Cron { expression } => write!(f, "cron({expression})"),
            TriggerSpec::Interval { every_secs } => write!(f, "interval({every_secs}s)"),
            TriggerSpec::Date { at } => write!(f, "date({})", at.to_rfc3339()),
        }
    }
}

type SyncJobFn = dyn Fn(&Kwargs) -> Result<()> + Send + Sync;
type AsyncJobFn = dyn Fn(Kwargs) -> BoxFuture<'static, Result<()>> + Send + Sync;

/// Target function of a scheduled job.
#[derive(Clone)]
pub enum JobFunc {
    Sync(Arc<SyncJobFn>),
    Async(Arc<AsyncJobFn>),
}

impl JobFunc {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&Kwargs) -> Result<()> + Send + Sync + 'static,
    {
        JobFunc::Sync(Arc::new(f))
    }

    pub fn asynchronous<F, Fut>(f: F) -> Self
    where
        F: Fn(Kwargs) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        JobFunc::Async(Arc::new(move |kwargs| -> BoxFuture<'static, Result<()>> {
            Box::pin(f(kwargs))
        }))
    }

    /// Invoke the job with its bound keyword arguments.
    pub fn call(&self, kwargs: &Kwargs) -> HandlerCall<'static> {
        match self {
            JobFunc::Sync(f) => HandlerCall::Ready(f(kwargs)),
            JobFunc::Async(f) => HandlerCall::Pending(f(kwargs.clone())),
        }
    }
}

impl std::fmt::Debug for JobFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobFunc::Sync(_) => write!(f, "JobFunc::Sync"),
            JobFunc::Async(_) => write!(f, "JobFunc::Async"),
        }
    }
}

/// A job declared by an addon.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    /// Unique within the owning addon's namespace.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    pub trigger: TriggerSpec,
    pub func: JobFunc,
    pub kwargs: Kwargs,
}

impl ServiceSpec {
    pub fn new(id: &str, name: &str, trigger: TriggerSpec, func: JobFunc) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            trigger,
            func,
            kwargs: Kwargs::new(),
        }
    }

    pub fn with_kwarg(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.kwargs.insert(key.to_string(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_spec_serde_tagged() {
        let spec: TriggerSpec =
            serde_json::from_str(r#"{"trigger":"interval","every_secs":30}"#).unwrap();
        assert_eq!(spec, TriggerSpec::interval(30));
        assert_eq!(spec.to_string(), "interval(30s)");
    }

    #[test]
    fn test_sync_job_receives_kwargs() {
        let func = JobFunc::sync(|kwargs| {
            assert_eq!(kwargs["target"], "misskey-hub.net");
            Ok(())
        });
        let spec = ServiceSpec::new("refresh", "Refresh", TriggerSpec::interval(60), func)
            .with_kwarg("target", "misskey-hub.net");
        assert!(matches!(spec.func.call(&spec.kwargs), HandlerCall::Ready(Ok(()))));
    }
}
