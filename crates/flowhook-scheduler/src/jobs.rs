//! Job definitions — triggers and the inspection model for scheduled work.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use flowhook_core::{FlowhookError, Result, TriggerSpec};

use crate::cron::CronSchedule;

/// A validated trigger. Built once from the addon's [`TriggerSpec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Cron(CronSchedule),
    Interval(Duration),
    /// Fires once at this instant, or on the next tick if already past.
    Date(DateTime<Utc>),
}

impl Trigger {
    pub fn from_spec(spec: &TriggerSpec) -> Result<Self> {
        match spec {
            TriggerSpec::Cron { expression } => Ok(Trigger::Cron(CronSchedule::parse(expression)?)),
            TriggerSpec::Interval { every_secs } => {
                if *every_secs == 0 {
                    return Err(FlowhookError::Trigger("interval must be at least 1 second".into()));
                }
                let secs = i64::try_from(*every_secs)
                    .map_err(|_| FlowhookError::Trigger(format!("interval {every_secs}s too large")))?;
                Duration::try_seconds(secs)
                    .map(Trigger::Interval)
                    .ok_or_else(|| FlowhookError::Trigger(format!("interval {every_secs}s too large")))
            }
            TriggerSpec::Date { at } => Ok(Trigger::Date(*at)),
        }
    }

    /// First run for a job registered at `now`.
    pub fn first_run(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Date(at) => Some(*at),
            _ => self.next_run(now),
        }
    }

    /// Next run after a firing at `now`. One-shot triggers return `None`.
    pub fn next_run(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Cron(schedule) => schedule.next_after(now),
            Trigger::Interval(every) => now.checked_add_signed(*every),
            Trigger::Date(_) => None,
        }
    }

    /// Next run after the occurrence due at `scheduled_for`, catching up to
    /// the first one strictly after `now`. Intervals keep their phase, so a
    /// late tick does not shift every following run.
    pub fn next_run_from(&self, scheduled_for: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Interval(every) => {
                let step = every.num_milliseconds().max(1);
                let behind = (now - scheduled_for).num_milliseconds().max(0);
                let steps = behind / step + 1;
                scheduled_for.checked_add_signed(Duration::try_milliseconds(step.checked_mul(steps)?)?)
            }
            _ => self.next_run(now),
        }
    }

    pub fn is_one_shot(&self) -> bool {
        matches!(self, Trigger::Date(_))
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::Cron(schedule) => write!(f, "cron({schedule})"),
            Trigger::Interval(every) => write!(f, "interval({}s)", every.num_seconds()),
            Trigger::Date(at) => write!(f, "date({})", at.to_rfc3339()),
        }
    }
}

/// Job status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Scheduled,
    Running,
    Paused,
    /// One-shot job that has fired.
    Completed,
}

/// Snapshot of a registered job.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobInfo {
    /// Namespaced key (`addon.id`).
    pub key: String,
    pub id: String,
    pub name: String,
    pub addon: Option<String>,
    pub trigger: String,
    pub status: JobStatus,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub run_count: u32,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_interval_trigger() {
        let now = Utc.with_ymd_and_hms(2026, 2, 22, 10, 0, 0).unwrap();
        let trigger = Trigger::from_spec(&TriggerSpec::interval(90)).unwrap();
        assert_eq!(trigger.first_run(now), Some(now + Duration::seconds(90)));
        assert_eq!(trigger.to_string(), "interval(90s)");
        assert!(!trigger.is_one_shot());
    }

    #[test]
    fn test_interval_keeps_phase_when_ticked_late() {
        let due = Utc.with_ymd_and_hms(2026, 2, 22, 10, 0, 0).unwrap();
        let trigger = Trigger::from_spec(&TriggerSpec::interval(60)).unwrap();
        assert_eq!(
            trigger.next_run_from(due, due + Duration::milliseconds(900)),
            Some(due + Duration::seconds(60))
        );
        // Missed occurrences are skipped, the phase is kept.
        assert_eq!(
            trigger.next_run_from(due, due + Duration::seconds(150)),
            Some(due + Duration::seconds(180))
        );
        assert_eq!(
            trigger.next_run_from(due, due + Duration::seconds(60)),
            Some(due + Duration::seconds(120))
        );
    }

    #[test]
    fn test_date_trigger_fires_once() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 2, 22, 10, 0, 0).unwrap();
        let trigger = Trigger::from_spec(&TriggerSpec::date(at)).unwrap();
        // Already past: still due.
        assert_eq!(trigger.first_run(now), Some(at));
        assert_eq!(trigger.next_run(now), None);
        assert!(trigger.is_one_shot());
    }

    #[test]
    fn test_invalid_triggers_rejected() {
        assert!(matches!(
            Trigger::from_spec(&TriggerSpec::interval(0)),
            Err(FlowhookError::Trigger(_))
        ));
        assert!(matches!(
            Trigger::from_spec(&TriggerSpec::cron("61 * * * *")),
            Err(FlowhookError::Trigger(_))
        ));
    }

    #[test]
    fn test_job_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&JobStatus::Paused).unwrap(), "\"paused\"");
    }
}
