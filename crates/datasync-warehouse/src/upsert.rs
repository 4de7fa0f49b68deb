use std::collections::{HashMap, HashSet};

use datasync_core::RunContext;
use rusqlite::types::Value;
use tracing::debug;

use crate::error::{Result, WarehouseError};
use crate::warehouse::{quote_all, quote_ident, Warehouse};

/// Target table, column order and the key used for insert-or-update.
#[derive(Debug, Clone)]
pub struct UpsertConfig {
    pub table: String,
    pub columns: Vec<String>,
    pub conflict_keys: Vec<String>,
}

impl UpsertConfig {
    pub fn new(table: &str, columns: &[&str], conflict_keys: &[&str]) -> Self {
        Self {
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            conflict_keys: conflict_keys.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Positions of the conflict keys within `columns`.
    fn key_indexes(&self) -> Result<Vec<usize>> {
        if self.columns.is_empty() || self.conflict_keys.is_empty() {
            return Err(self.invalid("columns and conflict keys must not be empty"));
        }
        self.conflict_keys
            .iter()
            .map(|k| {
                self.columns
                    .iter()
                    .position(|c| c == k)
                    .ok_or_else(|| self.invalid(&format!("conflict key {k} is not a column")))
            })
            .collect()
    }

    fn invalid(&self, reason: &str) -> WarehouseError {
        WarehouseError::InvalidConfig {
            table: self.table.clone(),
            reason: reason.to_string(),
        }
    }

    fn statement(&self) -> Result<String> {
        let table = quote_ident(&self.table)?;
        let cols = quote_all(&self.columns)?;
        let keys = quote_all(&self.conflict_keys)?;
        let placeholders = (1..=cols.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");

        let updates: Vec<String> = cols
            .iter()
            .filter(|c| !keys.contains(c))
            .map(|c| format!("{c} = excluded.{c}"))
            .collect();
        let on_conflict = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updates.join(", "))
        };

        Ok(format!(
            "INSERT INTO {table} ({}) VALUES ({placeholders}) ON CONFLICT ({}) {on_conflict}",
            cols.join(", "),
            keys.join(", "),
        ))
    }
}

fn key_of(row: &[Value], key_idx: &[usize]) -> String {
    key_idx
        .iter()
        .map(|&i| key_part(&row[i]))
        .collect::<Vec<_>>()
        .join("|")
}

/// SQLite compares an integral REAL equal to the INTEGER of the same value,
/// so both must produce the same key.
fn key_part(v: &Value) -> String {
    match *v {
        Value::Real(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
            format!("{:?}", Value::Integer(f as i64))
        }
        ref other => format!("{other:?}"),
    }
}

impl Warehouse {
    /// Insert-or-update `rows` keyed on `config.conflict_keys`, in one transaction.
    ///
    /// A batch must not contain the same conflict key twice; run
    /// [`dedupe_by_keys`] first. Returns the number of rows written.
    pub fn bulk_upsert(
        &self,
        ctx: &RunContext,
        config: &UpsertConfig,
        rows: &[Vec<Value>],
    ) -> Result<usize> {
        let key_idx = config.key_indexes()?;
        let sql = config.statement()?;

        let mut seen = HashSet::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            if row.len() != config.columns.len() {
                return Err(WarehouseError::RowShape {
                    index,
                    expected: config.columns.len(),
                    got: row.len(),
                });
            }
            let key = key_of(row, &key_idx);
            if !seen.insert(key.clone()) {
                return Err(WarehouseError::DuplicateConflictKey {
                    table: config.table.clone(),
                    key,
                });
            }
        }

        ctx.check()?;
        if rows.is_empty() {
            return Ok(0);
        }

        let affected = self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut affected = 0;
            {
                let mut stmt = tx.prepare_cached(&sql)?;
                for row in rows {
                    affected += stmt.execute(rusqlite::params_from_iter(row.iter()))?;
                }
            }
            tx.commit()?;
            Ok(affected)
        })?;

        debug!(table = %config.table, rows = rows.len(), affected, "bulk upsert committed");
        Ok(affected)
    }
}

/// Keep the last row for each conflict key, in first-seen key order.
pub fn dedupe_by_keys(config: &UpsertConfig, rows: Vec<Vec<Value>>) -> Result<Vec<Vec<Value>>> {
    let key_idx = config.key_indexes()?;
    let mut slot: HashMap<String, usize> = HashMap::with_capacity(rows.len());
    let mut out: Vec<Vec<Value>> = Vec::with_capacity(rows.len());
    for (index, row) in rows.into_iter().enumerate() {
        if row.len() != config.columns.len() {
            return Err(WarehouseError::RowShape {
                index,
                expected: config.columns.len(),
                got: row.len(),
            });
        }
        let key = key_of(&row, &key_idx);
        match slot.get(&key) {
            Some(&i) => out[i] = row,
            None => {
                slot.insert(key, out.len());
                out.push(row);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Warehouse, UpsertConfig) {
        let wh = Warehouse::in_memory().unwrap();
        let cfg = UpsertConfig::new("obs", &["series", "date", "value"], &["series", "date"]);
        wh.ensure_table(&cfg.table, &cfg.columns, &cfg.conflict_keys)
            .unwrap();
        (wh, cfg)
    }

    fn row(series: &str, date: &str, value: f64) -> Vec<Value> {
        vec![
            Value::Text(series.into()),
            Value::Text(date.into()),
            Value::Real(value),
        ]
    }

    #[test]
    fn upsert_inserts_then_updates() {
        let (wh, cfg) = setup();
        let ctx = RunContext::new();
        let n = wh
            .bulk_upsert(&ctx, &cfg, &[row("gdp", "2024-01", 1.0), row("gdp", "2024-02", 2.0)])
            .unwrap();
        assert_eq!(n, 2);

        wh.bulk_upsert(&ctx, &cfg, &[row("gdp", "2024-02", 2.5)])
            .unwrap();
        assert_eq!(wh.query_count("obs").unwrap(), 2);

        let v: f64 = wh
            .with_conn(|c| {
                Ok(c.query_row(
                    "SELECT value FROM obs WHERE series = 'gdp' AND date = '2024-02'",
                    [],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(v, 2.5);
    }

    #[test]
    fn duplicate_key_in_batch_is_rejected_without_writing() {
        let (wh, cfg) = setup();
        let err = wh
            .bulk_upsert(
                &RunContext::new(),
                &cfg,
                &[row("cpi", "2024-01", 1.0), row("cpi", "2024-01", 1.1)],
            )
            .unwrap_err();
        assert!(matches!(err, WarehouseError::DuplicateConflictKey { .. }));
        assert_eq!(wh.query_count("obs").unwrap(), 0);
    }

    #[test]
    fn row_shape_is_checked() {
        let (wh, cfg) = setup();
        let bad = vec![vec![Value::Text("x".into())]];
        let err = wh.bulk_upsert(&RunContext::new(), &cfg, &bad).unwrap_err();
        assert!(matches!(
            err,
            WarehouseError::RowShape { index: 0, expected: 3, got: 1 }
        ));
    }

    #[test]
    fn unknown_conflict_key_is_a_config_error() {
        let (wh, _) = setup();
        let cfg = UpsertConfig::new("obs", &["series"], &["date"]);
        let err = wh.bulk_upsert(&RunContext::new(), &cfg, &[]).unwrap_err();
        assert!(matches!(err, WarehouseError::InvalidConfig { .. }));
    }

    #[test]
    fn cancelled_context_writes_nothing() {
        let (wh, cfg) = setup();
        let ctx = RunContext::new();
        ctx.cancel();
        let err = wh
            .bulk_upsert(&ctx, &cfg, &[row("gdp", "2024-01", 1.0)])
            .unwrap_err();
        assert!(matches!(err, WarehouseError::Context(_)));
        assert_eq!(wh.query_count("obs").unwrap(), 0);
    }

    #[test]
    fn key_only_tables_do_nothing_on_conflict() {
        let wh = Warehouse::in_memory().unwrap();
        let cfg = UpsertConfig::new("codes", &["code"], &["code"]);
        wh.ensure_table(&cfg.table, &cfg.columns, &cfg.conflict_keys)
            .unwrap();
        let ctx = RunContext::new();
        wh.bulk_upsert(&ctx, &cfg, &[vec![Value::Text("A".into())]])
            .unwrap();
        let n = wh
            .bulk_upsert(&ctx, &cfg, &[vec![Value::Text("A".into())]])
            .unwrap();
        assert_eq!(n, 0);
        assert_eq!(wh.query_count("codes").unwrap(), 1);
    }

    #[test]
    fn dedupe_keeps_last_row_in_first_seen_order() {
        let cfg = UpsertConfig::new("obs", &["series", "date", "value"], &["series", "date"]);
        let rows = vec![
            row("a", "d1", 1.0),
            row("b", "d1", 2.0),
            row("a", "d1", 3.0),
        ];
        let out = dedupe_by_keys(&cfg, rows).unwrap();
        assert_eq!(out, vec![row("a", "d1", 3.0), row("b", "d1", 2.0)]);
    }

    #[test]
    fn integral_real_and_integer_keys_collide() {
        let wh = Warehouse::in_memory().unwrap();
        let cfg = UpsertConfig::new("facts", &["id", "v"], &["id"]);
        wh.ensure_table(&cfg.table, &cfg.columns, &cfg.conflict_keys)
            .unwrap();
        let rows = vec![
            vec![Value::Integer(1), Value::Text("first".into())],
            vec![Value::Real(1.0), Value::Text("second".into())],
            vec![Value::Real(1.5), Value::Text("other".into())],
        ];

        let err = wh.bulk_upsert(&RunContext::new(), &cfg, &rows).unwrap_err();
        assert!(matches!(err, WarehouseError::DuplicateConflictKey { .. }));

        let deduped = dedupe_by_keys(&cfg, rows).unwrap();
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0][1], Value::Text("second".into()));

        let n = wh.bulk_upsert(&RunContext::new(), &cfg, &deduped).unwrap();
        assert_eq!(n, 2);
        assert_eq!(wh.query_count("facts").unwrap(), 2);
    }
}
