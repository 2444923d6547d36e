use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use watchpost_core::{ArtifactRef, CaptureParams, Job};
use watchpost_store::Run;

/// Errors from the capture collaborator.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The target URL could not be reached or rendered.
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// The capture ran past the configured deadline.
    #[error("capture timed out after {0:?}")]
    Timeout(Duration),

    /// Shutdown interrupted the capture.
    #[error("capture cancelled by shutdown")]
    Cancelled,

    #[error("capture i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CompareError {
    #[error("comparison failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact not found: {reference}")]
    NotFound { reference: String },

    #[error("artifact i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// What a successful capture yields.
#[derive(Debug, Clone)]
pub struct CaptureOutput {
    /// Rendered screenshot bytes (format is the capture impl's choice).
    pub screenshot: Vec<u8>,
    /// Page-level errors observed during the capture. Non-fatal; logged
    /// alongside the run.
    pub page_errors: Vec<String>,
}

/// What a comparison yields.
#[derive(Debug, Clone)]
pub struct CompareOutput {
    /// Measured difference, percent. Identical inputs give exactly 0.0.
    pub diff_pct: f64,
    /// Optional rendered diff visualisation.
    pub diff_image: Option<Vec<u8>>,
}

/// Takes a screenshot of a URL. Browser automation lives behind this
/// trait; the engine only sees bytes.
#[async_trait]
pub trait Capture: Send + Sync {
    async fn capture(
        &self,
        url: &str,
        params: &CaptureParams,
    ) -> Result<CaptureOutput, CaptureError>;
}

/// Compares a fresh screenshot against baseline bytes.
///
/// Implementations must be deterministic: equal inputs give equal
/// output, and byte-identical inputs give a 0.0 difference.
#[async_trait]
pub trait Compare: Send + Sync {
    async fn compare(
        &self,
        screenshot: &[u8],
        baseline: &[u8],
    ) -> Result<CompareOutput, CompareError>;
}

/// Delivers a difference notification. Fire-and-forget from the
/// worker's perspective: failures are logged and never alter the run.
#[async_trait]
pub trait Notify: Send + Sync {
    async fn notify(&self, channel: &str, job: &Job, run: &Run) -> Result<(), NotifyError>;
}

/// Opaque storage for screenshots and diff images. Only the store that
/// produced an [`ArtifactRef`] can resolve it back to bytes.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, bytes: &[u8]) -> Result<ArtifactRef, ArtifactError>;
    async fn get(&self, reference: &ArtifactRef) -> Result<Vec<u8>, ArtifactError>;
}
