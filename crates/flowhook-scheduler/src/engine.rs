//! Scheduler Engine — keeps addon jobs and fires the ones that are due.
//! Uses tokio::interval for ticking; each due job runs on its own task so a
//! slow or failing job never holds up the others.
//!
//! Jobs are keyed `addon.id`. Every registration gets a fresh generation
//! number. A job collected by a tick carries the generation it was collected
//! under and is dropped before execution if the job was replaced or removed
//! in between, so an old and a new definition never both fire for one tick.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use flowhook_core::error::panic_reason;
use flowhook_core::{
    AddonDescriptor, FlowhookError, HandlerCall, JobFunc, Kwargs, Result, ServiceSpec,
};

use crate::jobs::{JobInfo, JobStatus, Trigger};

struct ScheduledJob {
    spec: ServiceSpec,
    trigger: Trigger,
    addon: Option<Arc<AddonDescriptor>>,
    generation: u64,
    status: JobStatus,
    /// A collected run has not finished yet. Kept apart from `status` so
    /// pausing and resuming cannot start a second overlapping run.
    in_flight: bool,
    next_run: Option<DateTime<Utc>>,
    last_run: Option<DateTime<Utc>>,
    run_count: u32,
    last_error: Option<String>,
}

impl ScheduledJob {
    fn info(&self, key: &str) -> JobInfo {
        JobInfo {
            key: key.to_string(),
            id: self.spec.id.clone(),
            name: self.spec.name.clone(),
            addon: self.addon.as_ref().map(|a| a.name.clone()),
            trigger: self.trigger.to_string(),
            status: self.status,
            next_run: self.next_run,
            last_run: self.last_run,
            run_count: self.run_count,
            last_error: self.last_error.clone(),
        }
    }
}

/// A job collected by [`ServiceScheduler::tick_at`], ready to execute.
#[derive(Debug, Clone)]
pub struct DueJob {
    pub key: String,
    pub generation: u64,
    pub func: JobFunc,
    pub kwargs: Kwargs,
    pub scheduled_for: DateTime<Utc>,
}

/// Outcome counts of one batch of due jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub fired: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Replaced or removed between collection and execution.
    pub stale: usize,
}

/// The service scheduler — owns every addon job.
pub struct ServiceScheduler {
    jobs: Mutex<HashMap<String, ScheduledJob>>,
    next_generation: AtomicU64,
}

impl ServiceScheduler {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Registry key for a job: `addon.id`, or just `id` for host-owned jobs.
    pub fn job_key(addon: Option<&str>, id: &str) -> String {
        match addon {
            Some(addon) => format!("{addon}.{id}"),
            None => id.to_string(),
        }
    }

    /// Register a job, replacing any job with the same key.
    pub fn register(&self, addon: Option<Arc<AddonDescriptor>>, spec: ServiceSpec) -> Result<String> {
        self.register_at(addon, spec, Utc::now())
    }

    /// [`register`](Self::register) with an explicit clock.
    pub fn register_at(
        &self,
        addon: Option<Arc<AddonDescriptor>>,
        spec: ServiceSpec,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let trigger = Trigger::from_spec(&spec.trigger)?;
        let next_run = trigger.first_run(now).ok_or_else(|| {
            FlowhookError::Trigger(format!("'{}' never fires", spec.trigger))
        })?;

        let key = Self::job_key(addon.as_ref().map(|a| a.name.as_str()), &spec.id);
        let job = ScheduledJob {
            spec,
            trigger,
            addon,
            generation: self.next_generation.fetch_add(1, Ordering::SeqCst),
            status: JobStatus::Scheduled,
            in_flight: false,
            next_run: Some(next_run),
            last_run: None,
            run_count: 0,
            last_error: None,
        };
        let trigger = job.trigger.to_string();

        let replaced = self.jobs.lock().insert(key.clone(), job).is_some();
        if replaced {
            tracing::info!(job = %key, %trigger, "📅 Job replaced, next run {next_run}");
        } else {
            tracing::info!(job = %key, %trigger, "📅 Job registered, next run {next_run}");
        }
        Ok(key)
    }

    /// Remove a job by key.
    pub fn unregister(&self, key: &str) -> bool {
        let removed = self.jobs.lock().remove(key).is_some();
        if removed {
            tracing::debug!(job = key, "Job unregistered");
        }
        removed
    }

    /// Remove the jobs of `addon` whose keys are not in `keep`. Returns how
    /// many were removed.
    pub fn retain_addon_jobs(&self, addon: &str, keep: &HashSet<String>) -> usize {
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|key, job| {
            keep.contains(key) || job.addon.as_ref().is_none_or(|a| a.name != addon)
        });
        let removed = before - jobs.len();
        if removed > 0 {
            tracing::debug!(addon, removed, "Jobs no longer declared, unregistered");
        }
        removed
    }

    /// Remove every job owned by `addon`. Returns how many were removed.
    pub fn unregister_addon(&self, addon: &str) -> usize {
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|_, job| job.addon.as_ref().is_none_or(|a| a.name != addon));
        before - jobs.len()
    }

    pub fn pause(&self, key: &str) -> bool {
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(key) {
            Some(job) if job.status != JobStatus::Completed => {
                job.status = JobStatus::Paused;
                true
            }
            _ => false,
        }
    }

    pub fn resume(&self, key: &str) -> bool {
        self.resume_at(key, Utc::now())
    }

    /// Resume a paused job. Recurring jobs whose next run passed while paused
    /// are moved to their next run after `now` instead of firing late.
    pub fn resume_at(&self, key: &str, now: DateTime<Utc>) -> bool {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(key) else {
            return false;
        };
        if job.status != JobStatus::Paused {
            return false;
        }
        job.status = if job.in_flight {
            JobStatus::Running
        } else {
            JobStatus::Scheduled
        };
        if !job.trigger.is_one_shot() {
            if let Some(next) = job.next_run.filter(|next| *next <= now) {
                job.next_run = job.trigger.next_run_from(next, now);
            }
        }
        true
    }

    /// Snapshot of every job, sorted by key.
    pub fn jobs(&self) -> Vec<JobInfo> {
        let jobs = self.jobs.lock();
        let mut infos: Vec<JobInfo> = jobs.iter().map(|(key, job)| job.info(key)).collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }

    pub fn job(&self, key: &str) -> Option<JobInfo> {
        self.jobs.lock().get(key).map(|job| job.info(key))
    }

    /// Number of jobs owned by `addon`.
    pub fn count_for(&self, addon: &str) -> usize {
        self.jobs
            .lock()
            .values()
            .filter(|job| job.addon.as_ref().is_some_and(|a| a.name == addon))
            .count()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Collect the jobs due at `now` and advance their schedules.
    ///
    /// Recurring jobs of a disabled addon skip this occurrence. A one-shot
    /// job of a disabled addon stays due until the addon is enabled again.
    /// A job still running from an earlier tick is not started twice.
    pub fn tick_at(&self, now: DateTime<Utc>) -> Vec<DueJob> {
        let mut due = Vec::new();
        let mut jobs = self.jobs.lock();

        for (key, job) in jobs.iter_mut() {
            if matches!(job.status, JobStatus::Paused | JobStatus::Completed) {
                continue;
            }
            let Some(scheduled_for) = job.next_run.filter(|next| *next <= now) else {
                continue;
            };

            if job.addon.as_ref().is_some_and(|a| !a.is_enabled()) {
                if !job.trigger.is_one_shot() {
                    job.next_run = job.trigger.next_run_from(scheduled_for, now);
                    tracing::debug!(job = %key, "Addon disabled, occurrence skipped");
                }
                continue;
            }
            if job.in_flight {
                job.next_run = job.trigger.next_run_from(scheduled_for, now);
                tracing::warn!(job = %key, "Still running, occurrence skipped");
                continue;
            }

            job.status = JobStatus::Running;
            job.in_flight = true;
            job.last_run = Some(now);
            job.next_run = job.trigger.next_run_from(scheduled_for, now);
            due.push(DueJob {
                key: key.clone(),
                generation: job.generation,
                func: job.spec.func.clone(),
                kwargs: job.spec.kwargs.clone(),
                scheduled_for,
            });
        }

        due
    }

    fn is_current(&self, due: &DueJob) -> bool {
        self.jobs
            .lock()
            .get(&due.key)
            .is_some_and(|job| job.generation == due.generation)
    }

    /// Run one collected job, containing errors and panics. Returns `None`
    /// when the job went stale before it started.
    pub async fn execute(&self, due: DueJob) -> Option<Result<()>> {
        if !self.is_current(&due) {
            tracing::debug!(job = %due.key, "Job replaced before execution, skipped");
            return None;
        }

        tracing::debug!(job = %due.key, scheduled_for = %due.scheduled_for, "🔔 Job triggered");
        let func = &due.func;
        let kwargs = &due.kwargs;
        let outcome = AssertUnwindSafe(async move {
            match func.call(kwargs) {
                HandlerCall::Ready(result) => result,
                HandlerCall::Pending(pending) => pending.await,
            }
        })
        .catch_unwind()
        .await;

        let result = match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(FlowhookError::JobExecution {
                job: due.key.clone(),
                reason: e.to_string(),
            }),
            Err(panic) => Err(FlowhookError::JobExecution {
                job: due.key.clone(),
                reason: panic_reason(panic.as_ref()),
            }),
        };
        if let Err(e) = &result {
            tracing::error!("{e}");
        }
        self.finish(&due, &result);
        Some(result)
    }

    fn finish(&self, due: &DueJob, result: &Result<()>) {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(&due.key) else {
            return;
        };
        if job.generation != due.generation {
            return;
        }
        job.run_count += 1;
        job.in_flight = false;
        job.last_error = result.as_ref().err().map(ToString::to_string);
        if job.status == JobStatus::Running {
            job.status = if job.next_run.is_some() {
                JobStatus::Scheduled
            } else {
                JobStatus::Completed
            };
        }
    }

    /// Execute a batch of collected jobs concurrently.
    pub async fn run_due(&self, due: Vec<DueJob>) -> TickReport {
        let outcomes = futures::future::join_all(due.into_iter().map(|d| self.execute(d))).await;
        let mut report = TickReport::default();
        for outcome in outcomes {
            match outcome {
                None => report.stale += 1,
                Some(Ok(())) => {
                    report.fired += 1;
                    report.succeeded += 1;
                }
                Some(Err(_)) => {
                    report.fired += 1;
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Collect and run everything due at `now`.
    pub async fn run_pending_at(&self, now: DateTime<Utc>) -> TickReport {
        let due = self.tick_at(now);
        self.run_due(due).await
    }

    /// Spawn the scheduler loop as a background tokio task. Each due job
    /// runs on its own task. The loop exits when `cancel` fires; jobs
    /// already started are left to finish.
    pub fn spawn(self: Arc<Self>, every: std::time::Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("⏰ Scheduler started (tick every {}ms)", every.as_millis());
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                for due in self.tick_at(Utc::now()) {
                    let scheduler = self.clone();
                    tokio::spawn(async move {
                        scheduler.execute(due).await;
                    });
                }
            }
            tracing::info!("Scheduler stopped");
        })
    }
}

impl Default for ServiceScheduler {
    fn default() -> Self {
        Self::new()
    }
}
