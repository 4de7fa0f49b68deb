use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use datasync_warehouse::Warehouse;
use rusqlite::{types::Type, Connection, OptionalExtension, Row};
use tracing::{debug, info, warn};

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    types::RunRecord,
};

/// Error text written to rows reaped by [`Ledger::reap_abandoned`].
pub const ABANDONED_ERROR: &str = "abandoned: process exited before completion";

const SELECT_COLUMNS: &str =
    "SELECT id, job_name, started_at, completed_at, rows_affected, error_text FROM job_runs";

/// Persisted record of every job invocation.
///
/// Each invocation gets a fresh id from [`Ledger::start`] and moves at most
/// once to a terminal state through [`Ledger::complete`] or [`Ledger::fail`].
/// Clones share one connection; each operation is a single short statement.
#[derive(Clone)]
pub struct Ledger {
    conn: Arc<Mutex<Connection>>,
}

impl Ledger {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(datasync_warehouse::warehouse::BUSY_TIMEOUT)?;
        Self::new(conn)
    }

    /// Ledger on the warehouse's own connection.
    ///
    /// Jobs' upsert transactions and ledger writes then serialize on one
    /// lock instead of contending for the SQLite file lock, so a long
    /// write by one job cannot fail a sibling's `complete`/`fail`.
    pub fn from_warehouse(warehouse: &Warehouse) -> Result<Self> {
        let conn = warehouse.shared_conn();
        init_db(&conn.lock().expect("ledger connection poisoned"))?;
        Ok(Self { conn })
    }

    pub fn in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    /// Start time of the job's most recent completed run.
    ///
    /// A missing row and a failed lookup both return `None` ("never synced"):
    /// the worst case is an extra run, never a missed one. Lookup failures
    /// are logged so they do not go unnoticed.
    pub fn last_success(&self, job_name: &str) -> Option<DateTime<Utc>> {
        let conn = self.conn.lock().expect("ledger connection poisoned");
        let found = conn
            .query_row(
                "SELECT started_at FROM job_runs
                 WHERE job_name = ?1 AND completed_at IS NOT NULL AND error_text IS NULL
                 ORDER BY started_at DESC, id DESC LIMIT 1",
                [job_name],
                |row| parse_ts(row, 0),
            )
            .optional();
        match found {
            Ok(last) => last,
            Err(e) => {
                warn!(job = %job_name, error = %e, "last-success lookup failed; treating as never synced");
                None
            }
        }
    }

    /// Record a new invocation starting now and return its id.
    pub fn start(&self, job_name: &str) -> Result<i64> {
        self.start_at(job_name, Utc::now())
    }

    pub fn start_at(&self, job_name: &str, started_at: DateTime<Utc>) -> Result<i64> {
        let conn = self.conn.lock().expect("ledger connection poisoned");
        conn.execute(
            "INSERT INTO job_runs (job_name, started_at) VALUES (?1, ?2)",
            rusqlite::params![job_name, fmt_ts(started_at)],
        )?;
        let id = conn.last_insert_rowid();
        debug!(job = %job_name, run_id = id, "run started");
        Ok(id)
    }

    /// Move a started run to `completed`.
    pub fn complete(&self, id: i64, rows_affected: i64, completed_at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().expect("ledger connection poisoned");
        let n = conn.execute(
            "UPDATE job_runs SET completed_at = ?1, rows_affected = ?2
             WHERE id = ?3 AND completed_at IS NULL",
            rusqlite::params![fmt_ts(completed_at), rows_affected, id],
        )?;
        if n == 0 {
            return Err(SchedulerError::InvalidTransition { id });
        }
        Ok(())
    }

    /// Move a started run to `failed`.
    pub fn fail(&self, id: i64, error_text: &str, completed_at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().expect("ledger connection poisoned");
        let n = conn.execute(
            "UPDATE job_runs SET completed_at = ?1, error_text = ?2
             WHERE id = ?3 AND completed_at IS NULL",
            rusqlite::params![fmt_ts(completed_at), error_text, id],
        )?;
        if n == 0 {
            return Err(SchedulerError::InvalidTransition { id });
        }
        Ok(())
    }

    pub fn get(&self, id: i64) -> Result<RunRecord> {
        let conn = self.conn.lock().expect("ledger connection poisoned");
        conn.query_row(
            &format!("{SELECT_COLUMNS} WHERE id = ?1"),
            [id],
            row_to_record,
        )
        .optional()?
        .ok_or(SchedulerError::RunNotFound { id })
    }

    /// Most recent runs first, optionally for one job only.
    pub fn recent(&self, job_name: Option<&str>, limit: usize) -> Result<Vec<RunRecord>> {
        let conn = self.conn.lock().expect("ledger connection poisoned");
        let limit = limit as i64;
        let records = match job_name {
            Some(name) => {
                let mut stmt = conn.prepare_cached(&format!(
                    "{SELECT_COLUMNS} WHERE job_name = ?1 ORDER BY id DESC LIMIT ?2"
                ))?;
                let rows = stmt.query_map(rusqlite::params![name, limit], row_to_record)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt =
                    conn.prepare_cached(&format!("{SELECT_COLUMNS} ORDER BY id DESC LIMIT ?1"))?;
                let rows = stmt.query_map([limit], row_to_record)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(records)
    }

    /// Runs started at or after `since`, oldest first.
    pub fn started_since(&self, since: DateTime<Utc>) -> Result<Vec<RunRecord>> {
        let conn = self.conn.lock().expect("ledger connection poisoned");
        let mut stmt = conn.prepare_cached(&format!(
            "{SELECT_COLUMNS} WHERE started_at >= ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map([fmt_ts(since)], row_to_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Fail every run still `started` that began before `before`.
    ///
    /// Only meaningful at process start, when no run of this process is in
    /// flight yet.
    pub fn reap_abandoned(&self, before: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock().expect("ledger connection poisoned");
        let n = conn.execute(
            "UPDATE job_runs SET completed_at = ?1, error_text = ?2
             WHERE completed_at IS NULL AND started_at < ?3",
            rusqlite::params![fmt_ts(Utc::now()), ABANDONED_ERROR, fmt_ts(before)],
        )?;
        if n > 0 {
            info!(count = n, "abandoned runs marked failed");
        }
        Ok(n)
    }
}

/// Fixed-width RFC 3339 so string order in SQL matches time order.
fn fmt_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(_) => parse_ts(row, idx).map(Some),
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        job_name: row.get(1)?,
        started_at: parse_ts(row, 2)?,
        completed_at: parse_opt_ts(row, 3)?,
        rows_affected: row.get(4)?,
        error_text: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RunStatus;
    use chrono::Duration;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn start_assigns_increasing_ids() {
        let ledger = Ledger::in_memory().unwrap();
        let a = ledger.start("ds1").unwrap();
        let b = ledger.start("ds1").unwrap();
        let c = ledger.start("ds2").unwrap();
        assert!(a < b && b < c);
        assert_eq!(ledger.get(a).unwrap().status(), RunStatus::Started);
    }

    #[test]
    fn complete_and_fail_are_terminal() {
        let ledger = Ledger::in_memory().unwrap();
        let now = Utc::now();

        let ok = ledger.start("ds1").unwrap();
        ledger.complete(ok, 10, now).unwrap();
        let rec = ledger.get(ok).unwrap();
        assert_eq!(rec.status(), RunStatus::Completed);
        assert_eq!(rec.rows_affected, Some(10));

        let bad = ledger.start("ds1").unwrap();
        ledger.fail(bad, "boom", now).unwrap();
        assert_eq!(ledger.get(bad).unwrap().status(), RunStatus::Failed);

        assert!(matches!(
            ledger.complete(bad, 1, now),
            Err(SchedulerError::InvalidTransition { .. })
        ));
        assert!(matches!(
            ledger.fail(ok, "late", now),
            Err(SchedulerError::InvalidTransition { .. })
        ));
        assert!(matches!(
            ledger.complete(9999, 1, now),
            Err(SchedulerError::InvalidTransition { id: 9999 })
        ));
        assert_eq!(ledger.get(ok).unwrap().error_text, None);
    }

    #[test]
    fn last_success_ignores_failed_and_started_runs() {
        let ledger = Ledger::in_memory().unwrap();
        assert_eq!(ledger.last_success("ds1"), None);

        let t1 = at("2025-01-01T00:00:00Z");
        let t2 = at("2025-02-01T00:00:00Z");
        let t3 = at("2025-03-01T00:00:00Z");

        let id = ledger.start_at("ds1", t1).unwrap();
        ledger.complete(id, 5, t1 + Duration::minutes(1)).unwrap();
        let id = ledger.start_at("ds1", t2).unwrap();
        ledger.fail(id, "upstream 500", t2 + Duration::minutes(1)).unwrap();
        ledger.start_at("ds1", t3).unwrap();
        ledger.start_at("other", t3).unwrap();

        assert_eq!(ledger.last_success("ds1"), Some(t1));
        assert_eq!(ledger.last_success("other"), None);
    }

    #[test]
    fn last_success_is_latest_by_start_time() {
        let ledger = Ledger::in_memory().unwrap();
        let late = at("2025-06-01T12:00:00.5Z");
        let early = at("2025-06-01T12:00:00Z");
        // Inserted out of order on purpose.
        let a = ledger.start_at("ds1", late).unwrap();
        let b = ledger.start_at("ds1", early).unwrap();
        ledger.complete(a, 1, late).unwrap();
        ledger.complete(b, 1, late).unwrap();
        assert_eq!(ledger.last_success("ds1"), Some(late));
    }

    #[test]
    fn lookup_failure_reads_as_never_synced() {
        let ledger = Ledger::in_memory().unwrap();
        let id = ledger.start("ds1").unwrap();
        ledger.complete(id, 1, Utc::now()).unwrap();
        ledger
            .conn
            .lock()
            .unwrap()
            .execute("DROP TABLE job_runs", [])
            .unwrap();
        assert_eq!(ledger.last_success("ds1"), None);
    }

    #[test]
    fn recent_lists_newest_first() {
        let ledger = Ledger::in_memory().unwrap();
        for name in ["a", "b", "a", "c"] {
            ledger.start(name).unwrap();
        }
        let all = ledger.recent(None, 10).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].job_name, "c");

        let only_a = ledger.recent(Some("a"), 1).unwrap();
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].id, 3);
    }

    #[test]
    fn started_since_filters_by_start_time() {
        let ledger = Ledger::in_memory().unwrap();
        ledger.start_at("a", at("2025-01-01T00:00:00Z")).unwrap();
        let b = ledger.start_at("b", at("2025-02-01T00:00:00Z")).unwrap();
        let c = ledger.start_at("c", at("2025-03-01T00:00:00Z")).unwrap();
        let ids: Vec<i64> = ledger
            .started_since(at("2025-02-01T00:00:00Z"))
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, [b, c]);
    }

    #[test]
    fn reap_fails_only_old_started_runs() {
        let ledger = Ledger::in_memory().unwrap();
        let old = ledger.start_at("a", at("2025-01-01T00:00:00Z")).unwrap();
        let done = ledger.start_at("b", at("2025-01-01T00:00:00Z")).unwrap();
        ledger.complete(done, 3, at("2025-01-01T00:10:00Z")).unwrap();
        let fresh = ledger.start("c").unwrap();

        let n = ledger.reap_abandoned(at("2025-06-01T00:00:00Z")).unwrap();
        assert_eq!(n, 1);

        let rec = ledger.get(old).unwrap();
        assert_eq!(rec.status(), RunStatus::Failed);
        assert_eq!(rec.error_text.as_deref(), Some(ABANDONED_ERROR));
        assert_eq!(ledger.get(done).unwrap().status(), RunStatus::Completed);
        assert_eq!(ledger.get(fresh).unwrap().status(), RunStatus::Started);
    }

    #[test]
    fn get_missing_run_is_not_found() {
        let ledger = Ledger::in_memory().unwrap();
        assert!(matches!(
            ledger.get(42),
            Err(SchedulerError::RunNotFound { id: 42 })
        ));
    }

    #[test]
    fn history_survives_reopen_next_to_warehouse_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warehouse.db");

        let warehouse = datasync_warehouse::Warehouse::open(&path).unwrap();
        warehouse.execute_batch("CREATE TABLE obs (k TEXT PRIMARY KEY)").unwrap();

        let ledger = Ledger::open(&path).unwrap();
        let id = ledger.start_at("ds1", at("2025-03-01T00:00:00Z")).unwrap();
        ledger.complete(id, 7, at("2025-03-01T00:01:00Z")).unwrap();
        drop(ledger);

        let reopened = Ledger::open(&path).unwrap();
        assert_eq!(reopened.last_success("ds1"), Some(at("2025-03-01T00:00:00Z")));
        assert_eq!(reopened.get(id).unwrap().rows_affected, Some(7));
        assert_eq!(warehouse.query_count("obs").unwrap(), 0);
    }

    #[test]
    fn ledger_writes_wait_out_a_long_warehouse_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let warehouse = datasync_warehouse::Warehouse::open(dir.path().join("wh.db")).unwrap();
        warehouse.execute_batch("CREATE TABLE obs (k TEXT PRIMARY KEY)").unwrap();
        let ledger = Ledger::from_warehouse(&warehouse).unwrap();
        let id = ledger.start("ds1").unwrap();

        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let writer = warehouse.clone();
        let holder = std::thread::spawn(move || {
            writer.with_conn(|conn| {
                conn.execute_batch("BEGIN IMMEDIATE; INSERT INTO obs VALUES ('a');")?;
                locked_tx.send(()).unwrap();
                std::thread::sleep(std::time::Duration::from_millis(300));
                conn.execute_batch("COMMIT")?;
                Ok(())
            })
        });

        locked_rx.recv().unwrap();
        ledger.complete(id, 1, Utc::now()).unwrap();
        holder.join().unwrap().unwrap();

        assert_eq!(ledger.get(id).unwrap().status(), RunStatus::Completed);
        assert_eq!(warehouse.query_count("obs").unwrap(), 1);
    }
}
