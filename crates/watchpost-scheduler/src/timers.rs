use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use watchpost_core::JobId;
use watchpost_dispatch::{DispatchQueue, EnqueueOutcome};

use crate::cron::CronExpr;
use crate::error::{Result, SchedulerError};
use crate::store::TriggerStore;

/// Injectable time source so timer arithmetic is testable.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

struct TimerSlot {
    cron_expr: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Maintains one lightweight timer task per active job id.
///
/// Each task sleeps until the job's next fire instant, pushes a fire
/// event into the dispatch queue (non-blocking), then re-arms for the
/// following instant. `schedule` atomically replaces an existing timer
/// under the map's shard lock, so there is never a window with two
/// live timers for one job id.
pub struct CronScheduler {
    queue: DispatchQueue,
    store: Arc<TriggerStore>,
    timers: DashMap<JobId, TimerSlot>,
    clock: Clock,
}

impl CronScheduler {
    pub fn new(queue: DispatchQueue, store: Arc<TriggerStore>) -> Self {
        Self::with_clock(queue, store, Arc::new(Utc::now))
    }

    /// Constructor with an explicit time source, for tests.
    pub fn with_clock(queue: DispatchQueue, store: Arc<TriggerStore>, clock: Clock) -> Self {
        Self {
            queue,
            store,
            timers: DashMap::new(),
            clock,
        }
    }

    /// Parse and sanity-check an expression without installing anything.
    pub fn validate(&self, cron_expr: &str) -> Result<CronExpr> {
        let expr = CronExpr::parse(cron_expr)?;
        if expr.next_after((self.clock)()).is_none() {
            return Err(SchedulerError::InvalidSchedule(format!(
                "no upcoming instant for '{cron_expr}'"
            )));
        }
        Ok(expr)
    }

    /// Install (or atomically replace) the timer for `job_id`.
    ///
    /// Returns immediately; firing happens on the spawned timer task.
    /// A malformed or unsatisfiable expression is rejected here and
    /// never silently skipped.
    pub fn schedule(&self, job_id: &JobId, cron_expr: &str) -> Result<()> {
        let expr = self.validate(cron_expr)?;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_timer(
            job_id.clone(),
            expr,
            self.queue.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            cancel.clone(),
        ));
        let slot = TimerSlot {
            cron_expr: cron_expr.to_string(),
            cancel,
            task,
        };

        // The entry guard holds the shard lock across the swap: the old
        // timer is cancelled before the new one becomes visible, so no
        // two timers are ever live and the gap is bounded by the swap.
        match self.timers.entry(job_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut e) => {
                e.get().cancel.cancel();
                e.get().task.abort();
                let old = e.insert(slot);
                info!(job_id = %job_id, from = %old.cron_expr, to = cron_expr, "timer replaced");
            }
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(slot);
                info!(job_id = %job_id, cron_expr, "timer installed");
            }
        }
        Ok(())
    }

    /// Cancel and remove the timer for `job_id`. Idempotent.
    pub fn cancel(&self, job_id: &JobId) {
        if let Some((_, slot)) = self.timers.remove(job_id) {
            slot.cancel.cancel();
            slot.task.abort();
            info!(job_id = %job_id, "timer cancelled");
        }
    }

    /// Cancel every timer without firing. Used at process shutdown.
    pub fn shutdown(&self) {
        let ids: Vec<JobId> = self.timers.iter().map(|e| e.key().clone()).collect();
        for id in &ids {
            self.cancel(id);
        }
        info!(count = ids.len(), "all timers cancelled");
    }

    pub fn is_scheduled(&self, job_id: &JobId) -> bool {
        self.timers.contains_key(job_id)
    }

    /// The expression the live timer was installed with, if any.
    pub fn cron_expr(&self, job_id: &JobId) -> Option<String> {
        self.timers.get(job_id).map(|s| s.cron_expr.clone())
    }

    pub fn active_jobs(&self) -> Vec<JobId> {
        self.timers.iter().map(|e| e.key().clone()).collect()
    }
}

/// Per-job timer loop: arm, sleep, fire, re-arm.
async fn run_timer(
    job_id: JobId,
    expr: CronExpr,
    queue: DispatchQueue,
    store: Arc<TriggerStore>,
    clock: Clock,
    cancel: CancellationToken,
) {
    loop {
        let now = (clock)();
        let Some(next) = expr.next_after(now) else {
            warn!(job_id = %job_id, expr = %expr, "no upcoming instant — timer stopping");
            break;
        };

        // Bookkeeping only; a failed write must not stop the cadence.
        if let Err(e) = store.record_next_fire(&job_id, next) {
            warn!(job_id = %job_id, "next-fire bookkeeping failed: {e}");
        }

        let wait = (next - now).to_std().unwrap_or_default();
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {
                // A late wake (process suspended past the instant) still
                // lands here exactly once, and the next instant is
                // computed from the current clock on the next pass —
                // missed ticks are never replayed as a backlog.
                match queue.enqueue(job_id.clone()) {
                    Ok(EnqueueOutcome::Queued) => {
                        debug!(job_id = %job_id, at = %next, "fire dispatched");
                    }
                    Ok(EnqueueOutcome::Coalesced) => {
                        debug!(job_id = %job_id, at = %next, "fire coalesced into in-flight dispatch");
                    }
                    Err(e) => {
                        warn!(job_id = %job_id, "fire dropped: {e}");
                    }
                }
            }
        }
    }
    debug!(job_id = %job_id, "timer task exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn trigger_store() -> Arc<TriggerStore> {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        Arc::new(TriggerStore::new(conn))
    }

    fn scheduler() -> (CronScheduler, DispatchQueue) {
        let queue = DispatchQueue::new(16);
        (CronScheduler::new(queue.clone(), trigger_store()), queue)
    }

    #[tokio::test]
    async fn invalid_expression_rejected() {
        let (sched, _q) = scheduler();
        let id = JobId::from("j1");

        let err = sched.schedule(&id, "not a cron").unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule(_)));
        assert!(!sched.is_scheduled(&id));

        // Well-formed but unsatisfiable is rejected the same way.
        let err = sched.schedule(&id, "0 0 30 2 *").unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule(_)));
        assert!(!sched.is_scheduled(&id));
    }

    #[tokio::test]
    async fn schedule_and_cancel() {
        let (sched, _q) = scheduler();
        let id = JobId::from("j1");

        sched.schedule(&id, "*/5 * * * *").unwrap();
        assert!(sched.is_scheduled(&id));

        sched.cancel(&id);
        assert!(!sched.is_scheduled(&id));
        // Idempotent.
        sched.cancel(&id);
    }

    #[tokio::test]
    async fn replace_keeps_exactly_one_timer() {
        let (sched, _q) = scheduler();
        let id = JobId::from("j1");

        sched.schedule(&id, "*/5 * * * *").unwrap();
        sched.schedule(&id, "0 * * * *").unwrap();
        sched.schedule(&id, "30 6 * * *").unwrap();

        assert_eq!(sched.active_jobs().len(), 1);
        assert_eq!(sched.cron_expr(&id).as_deref(), Some("30 6 * * *"));
    }

    #[tokio::test]
    async fn failed_replace_keeps_old_timer() {
        let (sched, _q) = scheduler();
        let id = JobId::from("j1");

        sched.schedule(&id, "*/5 * * * *").unwrap();
        assert!(sched.schedule(&id, "garbage").is_err());

        assert!(sched.is_scheduled(&id));
        assert_eq!(sched.cron_expr(&id).as_deref(), Some("*/5 * * * *"));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_into_queue() {
        let (sched, queue) = scheduler();
        let id = JobId::from("j1");

        sched.schedule(&id, "* * * * *").unwrap();

        // Paused tokio time auto-advances through the sleep.
        let delivery = queue.dequeue().await.unwrap();
        assert_eq!(delivery.job_id(), &id);
        sched.cancel(&id);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_fires_coalesce_while_in_flight() {
        let (sched, queue) = scheduler();
        let id = JobId::from("j1");

        sched.schedule(&id, "* * * * *").unwrap();
        let delivery = queue.dequeue().await.unwrap();

        // Hold the delivery while the timer keeps firing; every extra
        // fire must coalesce, not queue.
        tokio::time::sleep(std::time::Duration::from_secs(180)).await;
        sched.cancel(&id);

        assert!(queue.skipped_ticks(&id) >= 1);
        assert_eq!(queue.stats().enqueued, 1);
        drop(delivery);
    }

    #[tokio::test]
    async fn shutdown_cancels_everything() {
        let (sched, _q) = scheduler();
        sched.schedule(&JobId::from("a"), "* * * * *").unwrap();
        sched.schedule(&JobId::from("b"), "0 * * * *").unwrap();

        sched.shutdown();
        assert!(sched.active_jobs().is_empty());
    }

    #[tokio::test]
    async fn arming_records_next_fire() {
        let store = trigger_store();
        let queue = DispatchQueue::new(16);
        let sched = CronScheduler::new(queue, Arc::clone(&store));
        let id = JobId::from("j1");

        store.upsert(&id, "*/5 * * * *").unwrap();
        sched.schedule(&id, "*/5 * * * *").unwrap();

        // The timer task writes bookkeeping when it arms.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let rec = &store.list_all().unwrap()[0];
        assert!(rec.next_fire.is_some());
        sched.cancel(&id);
    }
}
