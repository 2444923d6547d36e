use std::sync::Mutex;

use rusqlite::Connection;
use tracing::debug;
use uuid::Uuid;
use watchpost_core::{ArtifactRef, JobId};

use crate::error::{Result, StoreError};

/// Lifecycle state of a single execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Created by the worker, capture not started yet (transient).
    Pending,
    /// The owning worker is capturing/comparing.
    Running,
    /// Capture succeeded; difference within the job threshold.
    NoChange,
    /// Capture succeeded; difference exceeded the job threshold.
    Difference,
    /// Capture or compare failed; see the error reason.
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::NoChange => "no_change",
            RunStatus::Difference => "difference",
            RunStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "no_change" => Ok(RunStatus::NoChange),
            "difference" => Ok(RunStatus::Difference),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// The record of one execution attempt.
#[derive(Debug, Clone)]
pub struct Run {
    /// UUID v4 string — primary key.
    pub id: String,
    pub job_id: JobId,
    pub status: RunStatus,
    /// ISO-8601 execution start.
    pub started_at: String,
    /// ISO-8601 execution end; `None` while the run is in progress.
    pub ended_at: Option<String>,
    /// Measured difference against the baseline, percent.
    pub diff_pct: Option<f64>,
    pub screenshot_ref: Option<ArtifactRef>,
    pub diff_ref: Option<ArtifactRef>,
    /// Failure reason when status is `Failed`.
    pub error: Option<String>,
}

/// Completed-run fields handed to [`RunStore::finish`].
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub diff_pct: Option<f64>,
    pub screenshot_ref: Option<ArtifactRef>,
    pub diff_ref: Option<ArtifactRef>,
}

/// Thread-safe store for run records.
///
/// A run is mutated only by the worker that created it and becomes
/// immutable once ended — `finish`/`fail` refuse to touch ended rows.
pub struct RunStore {
    db: Mutex<Connection>,
}

impl RunStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Create a run in `Pending` state. The owning worker flips it to
    /// `Running` via [`RunStore::start`] just before the capture.
    pub fn begin(&self, job_id: &JobId) -> Result<Run> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO runs (id, job_id, status, started_at)
             VALUES (?1, ?2, 'pending', ?3)",
            rusqlite::params![id, job_id.as_str(), now],
        )?;
        debug!(run_id = %id, job_id = %job_id, "run created");
        Ok(Run {
            id,
            job_id: job_id.clone(),
            status: RunStatus::Pending,
            started_at: now,
            ended_at: None,
            diff_pct: None,
            screenshot_ref: None,
            diff_ref: None,
            error: None,
        })
    }

    /// Mark a pending run as executing.
    pub fn start(&self, run_id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE runs SET status = 'running' WHERE id = ?1 AND ended_at IS NULL",
            [run_id],
        )?;
        if changed == 0 {
            return Err(self.ended_or_missing(&db, run_id));
        }
        Ok(())
    }

    /// Record a successful outcome and end the run.
    pub fn finish(&self, run_id: &str, outcome: &RunOutcome) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE runs
             SET status = ?1, ended_at = ?2, diff_pct = ?3,
                 screenshot_ref = ?4, diff_ref = ?5
             WHERE id = ?6 AND ended_at IS NULL",
            rusqlite::params![
                outcome.status.to_string(),
                now,
                outcome.diff_pct,
                outcome.screenshot_ref.as_ref().map(|a| a.as_str()),
                outcome.diff_ref.as_ref().map(|a| a.as_str()),
                run_id,
            ],
        )?;
        if changed == 0 {
            return Err(self.ended_or_missing(&db, run_id));
        }
        Ok(())
    }

    /// End the run as `Failed` with an error reason.
    pub fn fail(&self, run_id: &str, reason: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE runs SET status = 'failed', ended_at = ?1, error = ?2
             WHERE id = ?3 AND ended_at IS NULL",
            rusqlite::params![now, reason, run_id],
        )?;
        if changed == 0 {
            return Err(self.ended_or_missing(&db, run_id));
        }
        Ok(())
    }

    /// Retrieve a run by id.
    pub fn get(&self, run_id: &str) -> Result<Option<Run>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, job_id, status, started_at, ended_at, diff_pct,
                    screenshot_ref, diff_ref, error
             FROM runs WHERE id = ?1",
            [run_id],
            row_to_run,
        ) {
            Ok(run) => Ok(Some(run)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Most recent `limit` runs for a job, newest first.
    pub fn recent(&self, job_id: &JobId, limit: usize) -> Result<Vec<Run>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, job_id, status, started_at, ended_at, diff_pct,
                    screenshot_ref, diff_ref, error
             FROM runs
             WHERE job_id = ?1
             ORDER BY started_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![job_id.as_str(), limit as i64], row_to_run)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn ended_or_missing(&self, db: &Connection, run_id: &str) -> StoreError {
        let exists = db
            .query_row("SELECT 1 FROM runs WHERE id = ?1", [run_id], |_| Ok(()))
            .is_ok();
        if exists {
            StoreError::RunEnded {
                id: run_id.to_string(),
            }
        } else {
            StoreError::RunNotFound {
                id: run_id.to_string(),
            }
        }
    }
}

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<Run> {
    let status_str: String = row.get(2)?;
    Ok(Run {
        id: row.get(0)?,
        job_id: JobId(row.get::<_, String>(1)?),
        status: status_str.parse().unwrap_or(RunStatus::Failed),
        started_at: row.get(3)?,
        ended_at: row.get(4)?,
        diff_pct: row.get(5)?,
        screenshot_ref: row.get::<_, Option<String>>(6)?.map(ArtifactRef),
        diff_ref: row.get::<_, Option<String>>(7)?.map(ArtifactRef),
        error: row.get(8)?,
    })
}
