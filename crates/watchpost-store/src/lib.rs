//! `watchpost-store` — SQLite persistence for jobs and runs.
//!
//! Jobs are owned by the dashboard/CRUD layer; the engine reads them
//! through the [`JobRepository`] trait and only touches the baseline
//! artifact reference. Runs are written exclusively by the worker that
//! owns them and become immutable once ended.

pub mod db;
pub mod error;
pub mod jobs;
pub mod runs;

pub use error::{Result, StoreError};
pub use jobs::{JobRepository, SqliteJobStore};
pub use runs::{Run, RunOutcome, RunStatus, RunStore};
