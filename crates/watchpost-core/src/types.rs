use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a monitored job. Opaque to the engine — the
/// dashboard layer decides the format (we generate UUIDv7 when asked so
/// ids sort by creation time in logs).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque reference to a stored artifact (screenshot or diff image).
///
/// The engine never interprets the contents — only the `ArtifactStore`
/// implementation that produced it can resolve it back to bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef(pub String);

impl ArtifactRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ArtifactRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Optional knobs applied before a capture is taken.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureParams {
    /// Extra settle time after page load, in milliseconds.
    pub wait_ms: Option<u64>,
    /// Opaque pre-capture action (e.g. a click selector) forwarded to
    /// the capture collaborator verbatim.
    pub pre_action: Option<String>,
}

/// A user-configured monitoring target.
///
/// Owned by the dashboard/CRUD layer; the engine reads it by id through
/// `JobRepository` and never mutates it outside the reschedule path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Page to capture.
    pub url: String,
    /// 5-field cron expression (minute granularity).
    pub cron_expr: String,
    /// Paused jobs keep their row but never fire.
    pub paused: bool,
    /// A run counts as changed when its difference percentage exceeds
    /// this value. Zero means any nonzero difference is a change.
    pub threshold_pct: f64,
    #[serde(default)]
    pub capture: CaptureParams,
    /// Notification channel name, when the user wired one up.
    pub notify_channel: Option<String>,
    /// ISO-8601 creation timestamp.
    pub created_at: String,
    /// ISO-8601 timestamp of the last metadata update.
    pub updated_at: String,
}

impl Job {
    /// Minimal constructor used by tests and the CRUD layer.
    pub fn new(id: impl Into<JobId>, url: impl Into<String>, cron_expr: impl Into<String>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: id.into(),
            url: url.into(),
            cron_expr: cron_expr.into(),
            paused: false,
            threshold_pct: 0.0,
            capture: CaptureParams::default(),
            notify_channel: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_roundtrip() {
        let id = JobId::from("job-42");
        assert_eq!(id.as_str(), "job-42");
        assert_eq!(id.to_string(), "job-42");
    }

    #[test]
    fn new_job_defaults() {
        let job = Job::new("a", "https://example.com", "*/5 * * * *");
        assert!(!job.paused);
        assert_eq!(job.threshold_pct, 0.0);
        assert!(job.capture.wait_ms.is_none());
        assert!(job.notify_channel.is_none());
    }
}
