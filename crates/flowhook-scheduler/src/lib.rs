//! # Flowhook Scheduler
//!
//! Runs the background jobs addons declare through `Addon::services`.
//! Independent of the hook dispatcher: jobs never see a flow.
//!
//! ## Architecture
//! ```text
//! ServiceScheduler (tokio interval)
//!   ├── CronJob:     "0 8 * * *"   → refresh blocklist
//!   ├── IntervalJob: every 30s     → poll upstream
//!   ├── DateJob:     2026-02-22T15:00Z → one-shot migration
//!   └── on tick → due jobs → JobFunc(kwargs), one task each
//! ```
//!
//! Jobs are keyed `addon.id`; re-registering a key replaces the job in place.

pub mod cron;
pub mod engine;
pub mod jobs;

pub use cron::{CronError, CronSchedule};
pub use engine::{DueJob, ServiceScheduler, TickReport};
pub use jobs::{JobInfo, JobStatus, Trigger};
