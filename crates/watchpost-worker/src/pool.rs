use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use watchpost_core::{Job, JobId};
use watchpost_dispatch::DispatchQueue;
use watchpost_store::{JobRepository, RunOutcome, RunStatus, RunStore};

use crate::capture::{ArtifactStore, Capture, CaptureError, Compare, Notify};
use crate::error::Result;

/// Worker pool sizing and deadlines.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of long-lived worker tasks.
    pub workers: usize,
    /// Hard deadline for a single capture.
    pub capture_timeout: Duration,
    /// How long `shutdown` waits for in-flight work before aborting.
    pub shutdown_grace: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            capture_timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// The pluggable pieces a worker needs to turn a fire into a run.
#[derive(Clone)]
pub struct Collaborators {
    pub capture: Arc<dyn Capture>,
    pub compare: Arc<dyn Compare>,
    pub notify: Arc<dyn Notify>,
    pub artifacts: Arc<dyn ArtifactStore>,
}

struct WorkerCtx {
    queue: DispatchQueue,
    jobs: Arc<dyn JobRepository>,
    runs: Arc<RunStore>,
    collab: Collaborators,
    config: WorkerConfig,
}

/// Fixed-size execution pool.
///
/// Each worker loops dequeue → eligibility re-check → capture+compare →
/// record run → notify on difference. The dispatch queue's completion
/// guard releases the job id on every exit path, so per-job runs never
/// overlap: the guard outlives the run record.
pub struct WorkerPool {
    ctx: Arc<WorkerCtx>,
    tasks: JoinSet<()>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        queue: DispatchQueue,
        jobs: Arc<dyn JobRepository>,
        runs: Arc<RunStore>,
        collab: Collaborators,
        config: WorkerConfig,
    ) -> Self {
        Self {
            ctx: Arc::new(WorkerCtx {
                queue,
                jobs,
                runs,
                collab,
                config,
            }),
            tasks: JoinSet::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Spawn the worker tasks. Idempotent-ish: call once.
    pub fn start(&mut self) {
        for idx in 0..self.ctx.config.workers.max(1) {
            let ctx = Arc::clone(&self.ctx);
            let shutdown = self.shutdown.clone();
            self.tasks.spawn(worker_loop(idx, ctx, shutdown));
        }
        info!(workers = self.ctx.config.workers.max(1), "worker pool started");
    }

    /// Signal shutdown and wait up to the configured grace period for
    /// in-flight work to wind down. Captures still running when the
    /// token flips are cancelled and their runs recorded as failed.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        let grace = self.ctx.config.shutdown_grace;
        let drained = tokio::time::timeout(grace, async {
            while self.tasks.join_next().await.is_some() {}
        })
        .await
        .is_ok();
        if !drained {
            warn!(grace = ?grace, "grace period elapsed, aborting remaining workers");
            self.tasks.abort_all();
        }
        info!("worker pool stopped");
    }
}

async fn worker_loop(idx: usize, ctx: Arc<WorkerCtx>, shutdown: CancellationToken) {
    debug!(worker = idx, "worker started");
    loop {
        let delivery = tokio::select! {
            _ = shutdown.cancelled() => break,
            d = ctx.queue.dequeue() => match d {
                Ok(d) => d,
                Err(e) => {
                    warn!(worker = idx, "dequeue failed, worker stopping: {e}");
                    break;
                }
            },
        };

        let job_id = delivery.job_id().clone();
        process(&ctx, &job_id, &shutdown).await;
        // Dropping the delivery releases the in-flight slot, after the
        // run row is already ended.
        drop(delivery);
    }
    debug!(worker = idx, "worker stopped");
}

/// Handle one delivered fire end to end. Never returns an error —
/// everything is recorded on the run or logged.
async fn process(ctx: &WorkerCtx, job_id: &JobId, shutdown: &CancellationToken) {
    // Eligibility re-check right before execution: the job may have
    // been paused or deleted while the entry sat in the queue.
    let job = match ctx.jobs.get(job_id) {
        Ok(Some(job)) if !job.paused => job,
        Ok(Some(_)) => {
            debug!(job_id = %job_id, "job paused since dispatch, skipping");
            return;
        }
        Ok(None) => {
            debug!(job_id = %job_id, "job deleted since dispatch, skipping");
            return;
        }
        Err(e) => {
            warn!(job_id = %job_id, "eligibility check failed: {e}");
            return;
        }
    };

    let run = match ctx.runs.begin(job_id) {
        Ok(run) => run,
        Err(e) => {
            warn!(job_id = %job_id, "could not record run start: {e}");
            return;
        }
    };
    if let Err(e) = ctx.runs.start(&run.id) {
        warn!(run_id = %run.id, "could not mark run running: {e}");
    }

    // Panic isolation per entry: a bad capture impl takes down this run,
    // not the worker.
    let result = AssertUnwindSafe(execute(ctx, &job, shutdown))
        .catch_unwind()
        .await;

    match result {
        Ok(Ok(outcome)) => {
            let status = outcome.status;
            if let Err(e) = ctx.runs.finish(&run.id, &outcome) {
                warn!(run_id = %run.id, "could not record run outcome: {e}");
                return;
            }
            info!(job_id = %job_id, run_id = %run.id, status = %status, diff_pct = outcome.diff_pct, "run finished");
            if status == RunStatus::Difference {
                notify_difference(ctx, &job, &run.id).await;
            }
        }
        Ok(Err(e)) => {
            warn!(job_id = %job_id, run_id = %run.id, "run failed: {e}");
            if let Err(e2) = ctx.runs.fail(&run.id, &e.to_string()) {
                warn!(run_id = %run.id, "could not record run failure: {e2}");
            }
        }
        Err(_) => {
            warn!(job_id = %job_id, run_id = %run.id, "run panicked");
            if let Err(e) = ctx.runs.fail(&run.id, "panic during execution") {
                warn!(run_id = %run.id, "could not record run failure: {e}");
            }
        }
    }
}

/// Capture, store the screenshot, compare against the baseline and
/// decide the outcome. No retry here: the next tick is the retry.
async fn execute(
    ctx: &WorkerCtx,
    job: &Job,
    shutdown: &CancellationToken,
) -> Result<RunOutcome> {
    let captured = tokio::select! {
        _ = shutdown.cancelled() => return Err(CaptureError::Cancelled.into()),
        r = tokio::time::timeout(
            ctx.config.capture_timeout,
            ctx.collab.capture.capture(&job.url, &job.capture),
        ) => match r {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(CaptureError::Timeout(ctx.config.capture_timeout).into()),
        },
    };

    if !captured.page_errors.is_empty() {
        warn!(job_id = %job.id, count = captured.page_errors.len(), errors = ?captured.page_errors, "page errors during capture");
    }

    let screenshot_ref = ctx.collab.artifacts.put(&captured.screenshot).await?;

    let Some(baseline_ref) = ctx.jobs.baseline(&job.id)? else {
        // First successful capture becomes the baseline; nothing to
        // compare against yet.
        ctx.jobs.set_baseline(&job.id, &screenshot_ref)?;
        info!(job_id = %job.id, baseline = %screenshot_ref, "baseline installed");
        return Ok(RunOutcome {
            status: RunStatus::NoChange,
            diff_pct: None,
            screenshot_ref: Some(screenshot_ref),
            diff_ref: None,
        });
    };

    let baseline = ctx.collab.artifacts.get(&baseline_ref).await?;
    let cmp = ctx
        .collab
        .compare
        .compare(&captured.screenshot, &baseline)
        .await?;

    if cmp.diff_pct > job.threshold_pct {
        let diff_ref = match cmp.diff_image {
            Some(image) => Some(ctx.collab.artifacts.put(&image).await?),
            None => None,
        };
        // A detected difference becomes the new baseline so the next
        // run measures further drift, not cumulative change.
        ctx.jobs.set_baseline(&job.id, &screenshot_ref)?;
        Ok(RunOutcome {
            status: RunStatus::Difference,
            diff_pct: Some(cmp.diff_pct),
            screenshot_ref: Some(screenshot_ref),
            diff_ref,
        })
    } else {
        Ok(RunOutcome {
            status: RunStatus::NoChange,
            diff_pct: Some(cmp.diff_pct),
            screenshot_ref: Some(screenshot_ref),
            diff_ref: None,
        })
    }
}

/// Fire-and-forget difference notification. Failures never touch the
/// run record.
async fn notify_difference(ctx: &WorkerCtx, job: &Job, run_id: &str) {
    let Some(channel) = job.notify_channel.as_deref() else {
        return;
    };
    let run = match ctx.runs.get(run_id) {
        Ok(Some(run)) => run,
        Ok(None) => return,
        Err(e) => {
            warn!(run_id, "could not load run for notification: {e}");
            return;
        }
    };
    if let Err(e) = ctx.collab.notify.notify(channel, job, &run).await {
        warn!(job_id = %job.id, channel, "notification failed: {e}");
    }
}
