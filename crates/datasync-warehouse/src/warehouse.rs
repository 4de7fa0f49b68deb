use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{Connection, Params};
use tracing::debug;

use crate::error::{Result, WarehouseError};

/// How long a statement waits on a lock held by another process
/// (for example `datasync history` reading during a run).
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared handle to the warehouse database.
///
/// Cheap to clone; every clone talks to the same connection. Each call holds
/// the lock only for the duration of its statement or transaction, so jobs
/// writing different tables interleave freely.
#[derive(Clone)]
pub struct Warehouse {
    conn: Arc<Mutex<Connection>>,
}

impl Warehouse {
    /// Open (or create) the database file and apply connection pragmas.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        debug!(path = %path.as_ref().display(), "warehouse opened");
        Ok(Self::new(conn))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Connection::open_in_memory()?))
    }

    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// The connection behind this handle, for components that must write to
    /// the same database without a second connection (the run ledger).
    pub fn shared_conn(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock().expect("warehouse connection poisoned");
        f(&mut conn)
    }

    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        self.with_conn(|conn| Ok(conn.execute(sql, params)?))
    }

    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.with_conn(|conn| Ok(conn.execute_batch(sql)?))
    }

    /// Number of rows currently in `table`.
    pub fn query_count(&self, table: &str) -> Result<i64> {
        let table = quote_ident(table)?;
        self.with_conn(|conn| {
            Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })?)
        })
    }

    /// Create `table` if missing, keyed by `conflict_keys`.
    ///
    /// Columns are declared without a type so any SQLite value is accepted.
    pub fn ensure_table(
        &self,
        table: &str,
        columns: &[String],
        conflict_keys: &[String],
    ) -> Result<()> {
        if columns.is_empty() || conflict_keys.is_empty() {
            return Err(WarehouseError::InvalidConfig {
                table: table.to_string(),
                reason: "columns and conflict keys must not be empty".to_string(),
            });
        }
        let cols = quote_all(columns)?.join(", ");
        let keys = quote_all(conflict_keys)?.join(", ");
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({cols}, PRIMARY KEY ({keys}))",
            quote_ident(table)?
        );
        self.execute_batch(&sql)
    }
}

/// Validate and double-quote a SQL identifier.
pub(crate) fn quote_ident(name: &str) -> Result<String> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(WarehouseError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{name}\""))
}

pub(crate) fn quote_all(names: &[String]) -> Result<Vec<String>> {
    names.iter().map(|n| quote_ident(n)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_validated() {
        assert_eq!(quote_ident("series_id").unwrap(), "\"series_id\"");
        assert!(quote_ident("_x1").is_ok());
        assert!(quote_ident("1abc").is_err());
        assert!(quote_ident("a;drop table b").is_err());
        assert!(quote_ident("").is_err());
    }

    #[test]
    fn ensure_table_is_idempotent() {
        let wh = Warehouse::in_memory().unwrap();
        let cols = vec!["id".to_string(), "value".to_string()];
        let keys = vec!["id".to_string()];
        wh.ensure_table("obs", &cols, &keys).unwrap();
        wh.ensure_table("obs", &cols, &keys).unwrap();
        assert_eq!(wh.query_count("obs").unwrap(), 0);
    }

    #[test]
    fn ensure_table_rejects_empty_keys() {
        let wh = Warehouse::in_memory().unwrap();
        let err = wh
            .ensure_table("obs", &["id".to_string()], &[])
            .unwrap_err();
        assert!(matches!(err, WarehouseError::InvalidConfig { .. }));
    }
}
