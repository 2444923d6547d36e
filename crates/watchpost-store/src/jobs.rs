use std::sync::Mutex;

use rusqlite::Connection;
use tracing::debug;
use watchpost_core::{ArtifactRef, CaptureParams, Job, JobId};

use crate::error::{Result, StoreError};

/// Read access to the job table, as seen by the engine.
///
/// Assumed strongly consistent relative to the coordinator call that
/// triggered the read — the dashboard writes the job row before it
/// invokes the reschedule coordinator.
pub trait JobRepository: Send + Sync {
    /// Fetch a job by id. `None` when it was deleted.
    fn get(&self, id: &JobId) -> Result<Option<Job>>;

    /// Current baseline artifact for the job, if a capture ever succeeded.
    fn baseline(&self, id: &JobId) -> Result<Option<ArtifactRef>>;

    /// Install or replace the baseline artifact.
    fn set_baseline(&self, id: &JobId, artifact: &ArtifactRef) -> Result<()>;
}

/// SQLite-backed job store.
///
/// Wraps a single connection in a `Mutex` — critical sections are a
/// single statement, so contention stays negligible at this scale.
pub struct SqliteJobStore {
    db: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Insert a job row. Used by the CRUD layer and tests.
    pub fn insert(&self, job: &Job) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO jobs
             (id, url, cron_expr, paused, threshold_pct, wait_ms,
              pre_action, notify_channel, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            rusqlite::params![
                job.id.as_str(),
                job.url,
                job.cron_expr,
                job.paused as i64,
                job.threshold_pct,
                job.capture.wait_ms.map(|v| v as i64),
                job.capture.pre_action,
                job.notify_channel,
                job.created_at,
                job.updated_at,
            ],
        )?;
        debug!(job_id = %job.id, "job inserted");
        Ok(())
    }

    /// Update the mutable fields of a job row (schedule, paused flag,
    /// capture knobs). Timestamps are bumped here.
    pub fn update(&self, job: &Job) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE jobs
             SET url = ?1, cron_expr = ?2, paused = ?3, threshold_pct = ?4,
                 wait_ms = ?5, pre_action = ?6, notify_channel = ?7, updated_at = ?8
             WHERE id = ?9",
            rusqlite::params![
                job.url,
                job.cron_expr,
                job.paused as i64,
                job.threshold_pct,
                job.capture.wait_ms.map(|v| v as i64),
                job.capture.pre_action,
                job.notify_channel,
                now,
                job.id.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Delete a job row. No-op when absent.
    pub fn delete(&self, id: &JobId) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute("DELETE FROM jobs WHERE id = ?1", [id.as_str()])?;
        Ok(())
    }

    /// All jobs, ordered by creation time. Used by the daemon's startup
    /// reconciliation pass.
    pub fn list(&self) -> Result<Vec<Job>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, url, cron_expr, paused, threshold_pct, wait_ms,
                    pre_action, notify_channel, created_at, updated_at
             FROM jobs ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], row_to_job)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

impl JobRepository for SqliteJobStore {
    fn get(&self, id: &JobId) -> Result<Option<Job>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, url, cron_expr, paused, threshold_pct, wait_ms,
                    pre_action, notify_channel, created_at, updated_at
             FROM jobs WHERE id = ?1",
            [id.as_str()],
            row_to_job,
        ) {
            Ok(job) => Ok(Some(job)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    fn baseline(&self, id: &JobId) -> Result<Option<ArtifactRef>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT baseline_ref FROM jobs WHERE id = ?1",
            [id.as_str()],
            |row| row.get::<_, Option<String>>(0),
        ) {
            Ok(r) => Ok(r.map(ArtifactRef)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    fn set_baseline(&self, id: &JobId, artifact: &ArtifactRef) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE jobs SET baseline_ref = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![artifact.as_str(), now, id.as_str()],
        )?;
        Ok(())
    }
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    Ok(Job {
        id: JobId(row.get::<_, String>(0)?),
        url: row.get(1)?,
        cron_expr: row.get(2)?,
        paused: row.get::<_, i64>(3)? != 0,
        threshold_pct: row.get(4)?,
        capture: CaptureParams {
            wait_ms: row.get::<_, Option<i64>>(5)?.map(|v| v as u64),
            pre_action: row.get(6)?,
        },
        notify_channel: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn store() -> SqliteJobStore {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        SqliteJobStore::new(conn)
    }

    #[test]
    fn insert_and_get() {
        let store = store();
        let mut job = Job::new("j1", "https://example.com", "*/5 * * * *");
        job.threshold_pct = 2.5;
        job.capture.wait_ms = Some(1500);
        store.insert(&job).unwrap();

        let got = store.get(&JobId::from("j1")).unwrap().unwrap();
        assert_eq!(got.url, "https://example.com");
        assert_eq!(got.threshold_pct, 2.5);
        assert_eq!(got.capture.wait_ms, Some(1500));
        assert!(!got.paused);
    }

    #[test]
    fn get_missing_is_none() {
        let store = store();
        assert!(store.get(&JobId::from("nope")).unwrap().is_none());
    }

    #[test]
    fn update_changes_fields() {
        let store = store();
        let mut job = Job::new("j1", "https://example.com", "*/5 * * * *");
        store.insert(&job).unwrap();

        job.paused = true;
        job.cron_expr = "0 * * * *".to_string();
        store.update(&job).unwrap();

        let got = store.get(&job.id).unwrap().unwrap();
        assert!(got.paused);
        assert_eq!(got.cron_expr, "0 * * * *");
    }

    #[test]
    fn baseline_lifecycle() {
        let store = store();
        let job = Job::new("j1", "https://example.com", "* * * * *");
        store.insert(&job).unwrap();

        assert!(store.baseline(&job.id).unwrap().is_none());
        store
            .set_baseline(&job.id, &ArtifactRef("abc123.png".into()))
            .unwrap();
        assert_eq!(
            store.baseline(&job.id).unwrap().unwrap().as_str(),
            "abc123.png"
        );
    }

    #[test]
    fn delete_is_idempotent() {
        let store = store();
        let job = Job::new("j1", "https://example.com", "* * * * *");
        store.insert(&job).unwrap();
        store.delete(&job.id).unwrap();
        store.delete(&job.id).unwrap();
        assert!(store.get(&job.id).unwrap().is_none());
    }
}
