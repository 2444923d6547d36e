use rusqlite::Connection;

use crate::error::Result;

/// Initialise the trigger schema in `conn`.
///
/// The triggers table is a projection of the jobs table (cron
/// expression + paused state) plus next-fire bookkeeping — fully
/// re-derivable from jobs, so dropping it loses nothing but the
/// bookkeeping timestamps.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS triggers (
            job_id      TEXT NOT NULL PRIMARY KEY,
            cron_expr   TEXT NOT NULL,
            next_fire   TEXT,               -- ISO-8601 or NULL
            updated_at  TEXT NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}
