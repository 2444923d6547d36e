use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::debug;
use watchpost_core::JobId;

use crate::error::Result;

/// One persisted trigger row.
#[derive(Debug, Clone)]
pub struct TriggerRecord {
    pub job_id: JobId,
    pub cron_expr: String,
    /// ISO-8601 instant the timer was last armed for, if any.
    pub next_fire: Option<String>,
}

/// Durable job-id → cron-expression mapping.
///
/// Rows exist exactly while the job should fire: paused and deleted
/// jobs have no row. Wraps a single SQLite connection in a `Mutex` —
/// every critical section is one statement.
pub struct TriggerStore {
    db: Mutex<Connection>,
}

impl TriggerStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Record the desired schedule for a job. Idempotent.
    ///
    /// Returns `true` when the stored state changed (new row or a
    /// different expression), `false` when the row already matched.
    pub fn upsert(&self, job_id: &JobId, cron_expr: &str) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();

        let existing: Option<String> = match db.query_row(
            "SELECT cron_expr FROM triggers WHERE job_id = ?1",
            [job_id.as_str()],
            |row| row.get(0),
        ) {
            Ok(expr) => Some(expr),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };

        if existing.as_deref() == Some(cron_expr) {
            return Ok(false);
        }

        db.execute(
            "INSERT INTO triggers (job_id, cron_expr, next_fire, updated_at)
             VALUES (?1, ?2, NULL, ?3)
             ON CONFLICT(job_id) DO UPDATE
             SET cron_expr = excluded.cron_expr,
                 next_fire = NULL,
                 updated_at = excluded.updated_at",
            rusqlite::params![job_id.as_str(), cron_expr, now],
        )?;
        debug!(job_id = %job_id, cron_expr, "trigger upserted");
        Ok(true)
    }

    /// Remove a job's trigger row. No-op (not an error) when absent.
    pub fn remove(&self, job_id: &JobId) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute("DELETE FROM triggers WHERE job_id = ?1", [job_id.as_str()])?;
        if n > 0 {
            debug!(job_id = %job_id, "trigger removed");
        }
        Ok(())
    }

    /// Fetch a single trigger row. `None` when the job has none.
    pub fn get(&self, job_id: &JobId) -> Result<Option<TriggerRecord>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT job_id, cron_expr, next_fire FROM triggers WHERE job_id = ?1",
            [job_id.as_str()],
            |row| {
                Ok(TriggerRecord {
                    job_id: JobId(row.get::<_, String>(0)?),
                    cron_expr: row.get(1)?,
                    next_fire: row.get(2)?,
                })
            },
        ) {
            Ok(rec) => Ok(Some(rec)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All trigger rows. Used only for startup recovery; restartable.
    pub fn list_all(&self) -> Result<Vec<TriggerRecord>> {
        let db = self.db.lock().unwrap();
        let mut stmt =
            db.prepare("SELECT job_id, cron_expr, next_fire FROM triggers ORDER BY job_id")?;
        let rows = stmt.query_map([], |row| {
            Ok(TriggerRecord {
                job_id: JobId(row.get::<_, String>(0)?),
                cron_expr: row.get(1)?,
                next_fire: row.get(2)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Bookkeeping write: the timer for `job_id` is now armed for `at`.
    pub fn record_next_fire(&self, job_id: &JobId, at: DateTime<Utc>) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE triggers SET next_fire = ?1, updated_at = ?2 WHERE job_id = ?3",
            rusqlite::params![at.to_rfc3339(), Utc::now().to_rfc3339(), job_id.as_str()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn store() -> TriggerStore {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        TriggerStore::new(conn)
    }

    #[test]
    fn upsert_reports_change() {
        let store = store();
        let id = JobId::from("j1");

        assert!(store.upsert(&id, "*/5 * * * *").unwrap());
        // Same expression again: no change.
        assert!(!store.upsert(&id, "*/5 * * * *").unwrap());
        // Different expression: change.
        assert!(store.upsert(&id, "0 * * * *").unwrap());

        let all = store.list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].cron_expr, "0 * * * *");
    }

    #[test]
    fn get_returns_row_or_none() {
        let store = store();
        let id = JobId::from("j1");
        assert!(store.get(&id).unwrap().is_none());

        store.upsert(&id, "*/5 * * * *").unwrap();
        let rec = store.get(&id).unwrap().unwrap();
        assert_eq!(rec.cron_expr, "*/5 * * * *");
        assert!(rec.next_fire.is_none());
    }

    #[test]
    fn remove_is_idempotent() {
        let store = store();
        let id = JobId::from("j1");
        store.upsert(&id, "* * * * *").unwrap();

        store.remove(&id).unwrap();
        store.remove(&id).unwrap();
        assert!(store.list_all().unwrap().is_empty());
    }

    #[test]
    fn next_fire_bookkeeping() {
        let store = store();
        let id = JobId::from("j1");
        store.upsert(&id, "* * * * *").unwrap();

        let at = Utc::now();
        store.record_next_fire(&id, at).unwrap();

        let rec = &store.list_all().unwrap()[0];
        assert_eq!(rec.next_fire.as_deref(), Some(at.to_rfc3339().as_str()));

        // Re-upserting a new expression clears stale bookkeeping.
        store.upsert(&id, "0 * * * *").unwrap();
        assert!(store.list_all().unwrap()[0].next_fire.is_none());
    }

    #[test]
    fn list_all_is_restartable() {
        let store = store();
        store.upsert(&JobId::from("a"), "* * * * *").unwrap();
        store.upsert(&JobId::from("b"), "0 * * * *").unwrap();

        let first = store.list_all().unwrap();
        let second = store.list_all().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
    }
}
