//! `watchpost-worker` — the execution side of the engine.
//!
//! A fixed pool of workers drains the dispatch queue. For each
//! delivered fire a worker re-checks eligibility, captures the page,
//! compares it against the job's baseline, records a run and notifies
//! on a detected difference. Browser automation, image diffing,
//! notification transport and artifact storage all live behind the
//! traits in [`capture`] — the pool only orchestrates.

pub mod capture;
pub mod error;
pub mod pool;

pub use capture::{
    ArtifactError, ArtifactStore, Capture, CaptureError, CaptureOutput, Compare, CompareError,
    CompareOutput, Notify, NotifyError,
};
pub use error::{Result, WorkerError};
pub use pool::{Collaborators, WorkerConfig, WorkerPool};
