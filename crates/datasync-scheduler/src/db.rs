use rusqlite::Connection;

use crate::error::Result;

/// Initialise the run ledger schema in `conn`.
///
/// Creates the `job_runs` table (idempotent) and an index so the
/// last-success lookup stays cheap as the history grows.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS job_runs (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            job_name        TEXT    NOT NULL,
            started_at      TEXT    NOT NULL,   -- RFC 3339 UTC, fixed width
            completed_at    TEXT,               -- NULL while started
            rows_affected   INTEGER,            -- set on completion
            error_text      TEXT                -- set on failure
        ) STRICT;

        -- SELECT … WHERE job_name = ? AND completed … ORDER BY started_at DESC
        CREATE INDEX IF NOT EXISTS idx_job_runs_name_started
            ON job_runs (job_name, started_at DESC);
        ",
    )?;
    Ok(())
}
