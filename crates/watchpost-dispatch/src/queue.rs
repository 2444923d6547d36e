use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;
use watchpost_core::JobId;

use crate::error::{DispatchError, Result};

/// An enqueued fire event awaiting worker pickup.
#[derive(Debug, Clone)]
pub struct DispatchEntry {
    pub job_id: JobId,
    pub enqueued_at: DateTime<Utc>,
    /// Delivery attempt count — bumped when the entry is handed to a worker.
    pub attempt: u32,
}

/// What `enqueue` did with the fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new entry was created and made available for delivery.
    Queued,
    /// An entry for this job id was already in flight — the fire was
    /// dropped and recorded as a skipped tick.
    Coalesced,
}

/// Counter snapshot for observability.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchStats {
    pub enqueued: u64,
    pub delivered: u64,
    pub coalesced: u64,
    pub in_flight: usize,
}

struct Inner {
    capacity: usize,
    tx: mpsc::Sender<DispatchEntry>,
    rx: tokio::sync::Mutex<mpsc::Receiver<DispatchEntry>>,
    /// Job ids with an entry between enqueue and complete.
    in_flight: Mutex<HashSet<JobId>>,
    enqueued: AtomicU64,
    delivered: AtomicU64,
    coalesced: AtomicU64,
    /// Per-job skipped tick counts.
    skipped: DashMap<JobId, u64>,
}

/// Bounded work queue with at-least-once delivery and per-job-id
/// deduplication: no two concurrent deliveries ever exist for the same
/// job id.
///
/// Cheap to clone — all clones share the same queue state.
#[derive(Clone)]
pub struct DispatchQueue {
    inner: Arc<Inner>,
}

impl DispatchQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                capacity,
                tx,
                rx: tokio::sync::Mutex::new(rx),
                in_flight: Mutex::new(HashSet::new()),
                enqueued: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                coalesced: AtomicU64::new(0),
                skipped: DashMap::new(),
            }),
        }
    }

    /// Record a fire for `job_id`.
    ///
    /// When no entry for the id is in flight a new one is created;
    /// otherwise the fire is coalesced (counted, logged, not queued).
    /// Never blocks — safe to call from a timer task.
    pub fn enqueue(&self, job_id: JobId) -> Result<EnqueueOutcome> {
        {
            let mut in_flight = self.inner.in_flight.lock().unwrap();
            if in_flight.contains(&job_id) {
                self.inner.coalesced.fetch_add(1, Ordering::Relaxed);
                *self.inner.skipped.entry(job_id.clone()).or_insert(0) += 1;
                debug!(job_id = %job_id, "fire coalesced — prior dispatch still in flight");
                return Ok(EnqueueOutcome::Coalesced);
            }
            in_flight.insert(job_id.clone());
        }

        let entry = DispatchEntry {
            job_id: job_id.clone(),
            enqueued_at: Utc::now(),
            attempt: 0,
        };

        match self.inner.tx.try_send(entry) {
            Ok(()) => {
                self.inner.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(EnqueueOutcome::Queued)
            }
            Err(e) => {
                // Roll back the in-flight reservation — nothing was queued.
                self.inner.in_flight.lock().unwrap().remove(&job_id);
                match e {
                    mpsc::error::TrySendError::Full(_) => Err(DispatchError::QueueFull {
                        capacity: self.inner.capacity,
                    }),
                    mpsc::error::TrySendError::Closed(_) => Err(DispatchError::Closed),
                }
            }
        }
    }

    /// Wait for the next entry and deliver it to exactly one caller.
    ///
    /// The returned [`Delivery`] carries a completion guard: when it is
    /// dropped — on every exit path, including panics — the job id is
    /// released for future enqueues.
    pub async fn dequeue(&self) -> Result<Delivery> {
        let mut rx = self.inner.rx.lock().await;
        let mut entry = rx.recv().await.ok_or(DispatchError::Closed)?;
        drop(rx);

        entry.attempt += 1;
        self.inner.delivered.fetch_add(1, Ordering::Relaxed);
        debug!(job_id = %entry.job_id, attempt = entry.attempt, "dispatch entry delivered");

        let guard = CompletionGuard {
            inner: Arc::clone(&self.inner),
            job_id: Some(entry.job_id.clone()),
        };
        Ok(Delivery { entry, _guard: guard })
    }

    /// Release the in-flight slot for `job_id`, allowing the next
    /// enqueue to create a fresh entry.
    ///
    /// Workers never call this directly — the [`Delivery`] guard does,
    /// on drop, so the release cannot be skipped.
    pub fn complete(&self, job_id: &JobId) {
        self.inner.release(job_id);
    }

    /// Skipped tick count for one job id.
    pub fn skipped_ticks(&self, job_id: &JobId) -> u64 {
        self.inner.skipped.get(job_id).map(|v| *v).unwrap_or(0)
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            enqueued: self.inner.enqueued.load(Ordering::Relaxed),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            coalesced: self.inner.coalesced.load(Ordering::Relaxed),
            in_flight: self.inner.in_flight.lock().unwrap().len(),
        }
    }
}

impl Inner {
    fn release(&self, job_id: &JobId) {
        self.in_flight.lock().unwrap().remove(job_id);
    }
}

/// Scoped in-flight release. Held inside [`Delivery`]; dropping it
/// marks the entry complete.
struct CompletionGuard {
    inner: Arc<Inner>,
    job_id: Option<JobId>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if let Some(job_id) = self.job_id.take() {
            self.inner.release(&job_id);
            debug!(job_id = %job_id, "dispatch entry completed");
        }
    }
}

/// One delivered dispatch entry plus its completion guard.
pub struct Delivery {
    pub entry: DispatchEntry,
    _guard: CompletionGuard,
}

impl Delivery {
    pub fn job_id(&self) -> &JobId {
        &self.entry.job_id
    }

    /// Explicitly finish this delivery. Equivalent to dropping it.
    pub fn complete(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn id(s: &str) -> JobId {
        JobId::from(s)
    }

    #[tokio::test]
    async fn enqueue_then_dequeue() {
        let q = DispatchQueue::new(8);
        assert_eq!(q.enqueue(id("a")).unwrap(), EnqueueOutcome::Queued);

        let d = q.dequeue().await.unwrap();
        assert_eq!(d.job_id().as_str(), "a");
        assert_eq!(d.entry.attempt, 1);
    }

    #[tokio::test]
    async fn coalesces_while_in_flight() {
        let q = DispatchQueue::new(8);
        q.enqueue(id("a")).unwrap();

        // Five more fires before any worker completes the first.
        for _ in 0..5 {
            assert_eq!(q.enqueue(id("a")).unwrap(), EnqueueOutcome::Coalesced);
        }

        let stats = q.stats();
        assert_eq!(stats.enqueued, 1);
        assert_eq!(stats.coalesced, 5);
        assert_eq!(q.skipped_ticks(&id("a")), 5);

        // Still coalescing while the entry is delivered but not complete.
        let d = q.dequeue().await.unwrap();
        assert_eq!(q.enqueue(id("a")).unwrap(), EnqueueOutcome::Coalesced);

        // Completing releases the id for a fresh entry.
        d.complete();
        assert_eq!(q.enqueue(id("a")).unwrap(), EnqueueOutcome::Queued);
    }

    #[tokio::test]
    async fn distinct_jobs_are_independent() {
        let q = DispatchQueue::new(8);
        q.enqueue(id("a")).unwrap();
        assert_eq!(q.enqueue(id("b")).unwrap(), EnqueueOutcome::Queued);
        assert_eq!(q.stats().in_flight, 2);
    }

    #[tokio::test]
    async fn guard_releases_on_drop() {
        let q = DispatchQueue::new(8);
        q.enqueue(id("a")).unwrap();
        {
            let _d = q.dequeue().await.unwrap();
            // Dropped here without an explicit complete — simulates a
            // worker bailing out early.
        }
        assert_eq!(q.enqueue(id("a")).unwrap(), EnqueueOutcome::Queued);
    }

    #[tokio::test]
    async fn dequeue_blocks_until_work_arrives() {
        let q = DispatchQueue::new(8);
        let q2 = q.clone();

        let waiter = tokio::spawn(async move { q2.dequeue().await.unwrap() });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        q.enqueue(id("late")).unwrap();
        let d = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(d.job_id().as_str(), "late");
    }

    #[tokio::test]
    async fn full_queue_rolls_back_reservation() {
        let q = DispatchQueue::new(1);
        q.enqueue(id("a")).unwrap();

        let err = q.enqueue(id("b")).unwrap_err();
        assert!(matches!(err, DispatchError::QueueFull { capacity: 1 }));

        // The rejected id must not be stuck in flight.
        let d = q.dequeue().await.unwrap();
        d.complete();
        assert_eq!(q.enqueue(id("b")).unwrap(), EnqueueOutcome::Queued);
    }
}
