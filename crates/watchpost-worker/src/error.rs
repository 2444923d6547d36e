use thiserror::Error;

use crate::capture::{ArtifactError, CaptureError, CompareError};

/// Everything that can go wrong while executing one dispatch entry.
///
/// These never escalate past the worker: each variant ends up as a
/// `failed` run with the error text as the reason.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Compare(#[from] CompareError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("store error: {0}")]
    Store(#[from] watchpost_store::StoreError),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
