use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use watchpost_core::{Job, JobId};

use crate::error::Result;
use crate::store::TriggerStore;
use crate::timers::CronScheduler;

/// Applies job CRUD events to the durable trigger state and the live
/// timers, in that order.
///
/// All mutations for one job id are serialised through a per-id async
/// lock, so two concurrent updates to the same job cannot interleave
/// their persist and install steps. Validation happens before anything
/// is written: a bad cron expression leaves both the store and the
/// timer untouched.
pub struct RescheduleCoordinator {
    scheduler: Arc<CronScheduler>,
    store: Arc<TriggerStore>,
    locks: DashMap<JobId, Arc<Mutex<()>>>,
}

impl RescheduleCoordinator {
    pub fn new(scheduler: Arc<CronScheduler>, store: Arc<TriggerStore>) -> Self {
        Self {
            scheduler,
            store,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, job_id: &JobId) -> Arc<Mutex<()>> {
        self.locks
            .entry(job_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// A job was created. Paused jobs get no trigger row and no timer.
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub async fn on_job_created(&self, job: &Job) -> Result<()> {
        let lock = self.lock_for(&job.id);
        let _held = lock.lock().await;

        if job.paused {
            info!("job created paused, no trigger installed");
            return Ok(());
        }

        self.scheduler.validate(&job.cron_expr)?;
        self.store.upsert(&job.id, &job.cron_expr)?;
        self.scheduler.schedule(&job.id, &job.cron_expr)?;
        Ok(())
    }

    /// A job's settings changed (cron expression, paused flag, or
    /// anything else).
    ///
    /// An unchanged expression keeps the existing timer running so the
    /// cadence is not reset by unrelated edits.
    #[instrument(skip(self, job), fields(job_id = %job.id, paused = job.paused))]
    pub async fn on_job_updated(&self, job: &Job) -> Result<()> {
        let lock = self.lock_for(&job.id);
        let _held = lock.lock().await;

        if job.paused {
            self.scheduler.cancel(&job.id);
            self.store.remove(&job.id)?;
            info!("job paused, trigger withdrawn");
            return Ok(());
        }

        self.scheduler.validate(&job.cron_expr)?;
        let changed = self.store.upsert(&job.id, &job.cron_expr)?;
        if changed || !self.scheduler.is_scheduled(&job.id) {
            self.scheduler.schedule(&job.id, &job.cron_expr)?;
        }
        Ok(())
    }

    /// A job was deleted. Idempotent.
    ///
    /// The per-id lock entry stays in the map: a waiter that already
    /// cloned it must keep serialising against later mutations for the
    /// same id, and the map is bounded by job count anyway.
    #[instrument(skip(self))]
    pub async fn on_job_deleted(&self, job_id: &JobId) -> Result<()> {
        let lock = self.lock_for(job_id);
        let _held = lock.lock().await;
        self.scheduler.cancel(job_id);
        self.store.remove(job_id)?;
        Ok(())
    }

    /// Reinstall timers from the persisted trigger rows after a process
    /// restart.
    ///
    /// One bad row never blocks the rest: it is logged and skipped.
    /// Re-running this is harmless because `schedule` replaces rather
    /// than duplicates. Returns the number of timers installed.
    pub async fn on_startup(&self) -> Result<usize> {
        let records = self.store.list_all()?;
        let mut installed = 0usize;

        for rec in records {
            match self.reinstall(&rec.job_id).await {
                Ok(true) => installed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(job_id = %rec.job_id, cron_expr = %rec.cron_expr, "could not reinstall trigger: {e}");
                }
            }
        }

        info!(installed, "startup trigger recovery finished");
        Ok(installed)
    }

    /// Reinstall one trigger under the job's lock.
    ///
    /// The row is read again while the lock is held: a delete or
    /// reschedule racing the recovery scan wins, and a row that
    /// vanished between the scan and this call is skipped rather than
    /// resurrected as a dangling timer.
    async fn reinstall(&self, job_id: &JobId) -> Result<bool> {
        let lock = self.lock_for(job_id);
        let _held = lock.lock().await;

        let Some(rec) = self.store.get(job_id)? else {
            debug!(job_id = %job_id, "trigger withdrawn during recovery scan, skipping");
            return Ok(false);
        };

        if let Some(missed) = rec
            .next_fire
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .filter(|t| *t < Utc::now())
        {
            warn!(job_id = %job_id, missed_at = %missed, "fire instant passed while down, skipping to next");
        }

        self.scheduler.schedule(job_id, &rec.cron_expr)?;
        Ok(true)
    }
}
