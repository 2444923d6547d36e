//! `watchpost-scheduler` — cron triggers, per-job timers and the
//! reschedule control path.
//!
//! # Overview
//!
//! The [`store::TriggerStore`] persists one row per schedulable job
//! (cron expression + next-fire bookkeeping). The [`timers::CronScheduler`]
//! keeps one lightweight Tokio task per active job id that sleeps until
//! the next fire instant and pushes a fire event into the dispatch
//! queue. The [`coordinator::RescheduleCoordinator`] is the only
//! mutation surface: it serialises create/update/delete/startup per job
//! id so a schedule change can never leave two live timers — or a
//! dangling one — for a single job.
//!
//! Cron expressions are the classic 5-field form at minute granularity:
//! `minute hour day-of-month month day-of-week`, with `*`, values,
//! lists, ranges and `/step`.

pub mod coordinator;
pub mod cron;
pub mod db;
pub mod error;
pub mod store;
pub mod timers;

pub use coordinator::RescheduleCoordinator;
pub use cron::{CronExpr, CronParseError};
pub use error::{Result, SchedulerError};
pub use store::{TriggerRecord, TriggerStore};
pub use timers::CronScheduler;
