use thiserror::Error;

/// Errors that can occur in the job/run store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No run with the given id exists.
    #[error("Run not found: {id}")]
    RunNotFound { id: String },

    /// Attempt to mutate a run that has already ended.
    #[error("Run already ended: {id}")]
    RunEnded { id: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;
