use thiserror::Error;

/// Errors that can occur on the scheduling path.
///
/// Both variants are synchronous: they surface to the CRUD caller at
/// job create/update time, never out of a running timer.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Malformed or unsatisfiable cron expression.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Trigger persistence failed; the caller must not assume the
    /// mutation took effect.
    #[error("Trigger store unavailable: {0}")]
    StoreUnavailable(#[from] rusqlite::Error),
}

impl From<crate::cron::CronParseError> for SchedulerError {
    fn from(e: crate::cron::CronParseError) -> Self {
        SchedulerError::InvalidSchedule(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
