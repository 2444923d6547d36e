//! `watchpost-dispatch` — bounded fire-event queue with per-job coalescing.
//!
//! The cron timers push fire events here; workers pull them out. The
//! queue enforces the system's central invariant: for any job id, at
//! most one dispatch entry is in flight (enqueued but not yet
//! completed) at a time. A fire that arrives while one is in flight is
//! dropped and counted as a skipped tick, which is also the engine's
//! backpressure mechanism against slow or stuck captures.

pub mod error;
pub mod queue;

pub use error::{DispatchError, Result};
pub use queue::{Delivery, DispatchEntry, DispatchQueue, DispatchStats, EnqueueOutcome};
