use thiserror::Error;

/// Errors that can occur on the dispatch path.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The bounded channel is at capacity — the fire was dropped.
    #[error("Dispatch queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// All producers or the consumer side have gone away.
    #[error("Dispatch queue closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, DispatchError>;
