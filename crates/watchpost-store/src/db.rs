use rusqlite::Connection;

use crate::error::Result;

/// Initialise the jobs and runs tables.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS jobs (
            id             TEXT PRIMARY KEY,
            url            TEXT NOT NULL,
            cron_expr      TEXT NOT NULL,
            paused         INTEGER NOT NULL DEFAULT 0,
            threshold_pct  REAL NOT NULL DEFAULT 0,
            wait_ms        INTEGER,
            pre_action     TEXT,
            notify_channel TEXT,
            baseline_ref   TEXT,
            created_at     TEXT NOT NULL,
            updated_at     TEXT NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS runs (
            id             TEXT PRIMARY KEY,
            job_id         TEXT NOT NULL REFERENCES jobs(id),
            status         TEXT NOT NULL,
            started_at     TEXT NOT NULL,
            ended_at       TEXT,
            diff_pct       REAL,
            screenshot_ref TEXT,
            diff_ref       TEXT,
            error          TEXT
        ) STRICT;

        -- 'most recent N runs for a job' is the hot query
        CREATE INDEX IF NOT EXISTS idx_runs_job_started
            ON runs(job_id, started_at DESC);",
    )?;
    Ok(())
}
