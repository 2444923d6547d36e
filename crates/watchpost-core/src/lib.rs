//! `watchpost-core` — shared types, configuration and errors.
//!
//! Every other watchpost crate depends on this one. It carries the
//! domain vocabulary (jobs, capture parameters, artifact references),
//! the figment-based configuration loader and the top-level error type.

pub mod config;
pub mod error;
pub mod types;

pub use config::WatchpostConfig;
pub use error::{Result, WatchpostError};
pub use types::{ArtifactRef, CaptureParams, Job, JobId};
