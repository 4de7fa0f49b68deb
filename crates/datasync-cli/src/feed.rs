//! Config-declared JSON feed connector.
//!
//! Each `[[sources]]` entry becomes one [`JsonFeedJob`]: download a JSON
//! document, pick the records array, map fields to columns by name and
//! upsert them into a warehouse table.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use datasync_core::{Cadence, Category, RunOutcome};
use datasync_scheduler::{DueRule, Job, JobContext, JobError, Registry};
use datasync_warehouse::{dedupe_by_keys, UpsertConfig, Value};
use figment::Figment;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// One `[[sources]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSource {
    pub name: String,
    pub url: String,
    pub table: String,
    pub category: Category,
    pub cadence: Cadence,
    pub due: DueRule,
    /// JSON pointer to the records array, e.g. `/data/observations`.
    /// The document root is used when absent.
    #[serde(default)]
    pub records_pointer: Option<String>,
    pub columns: Vec<String>,
    pub conflict_keys: Vec<String>,
}

/// Read `[[sources]]` from the layered config. A config without sources is fine.
pub fn load_sources(figment: &Figment) -> anyhow::Result<Vec<FeedSource>> {
    if !figment.contains("sources") {
        return Ok(Vec::new());
    }
    Ok(figment.extract_inner("sources")?)
}

/// Register one job per source, in config order.
pub fn build_registry(sources: &[FeedSource]) -> datasync_scheduler::Result<Registry> {
    let mut registry = Registry::new();
    for source in sources {
        registry.register(Arc::new(JsonFeedJob::new(source.clone())))?;
    }
    Ok(registry)
}

pub struct JsonFeedJob {
    source: FeedSource,
    upsert: UpsertConfig,
}

impl JsonFeedJob {
    pub fn new(source: FeedSource) -> Self {
        let upsert = UpsertConfig {
            table: source.table.clone(),
            columns: source.columns.clone(),
            conflict_keys: source.conflict_keys.clone(),
        };
        Self { source, upsert }
    }

    /// Turn a JSON document into rows ordered like `columns`.
    fn rows_from_json(&self, raw: &[u8]) -> Result<Vec<Vec<Value>>, JobError> {
        let doc: serde_json::Value = serde_json::from_slice(raw)?;
        let records = match &self.source.records_pointer {
            Some(pointer) => doc
                .pointer(pointer)
                .ok_or_else(|| JobError::Parse(format!("no value at pointer {pointer}")))?,
            None => &doc,
        };
        let records = records
            .as_array()
            .ok_or_else(|| JobError::Parse("records are not a JSON array".to_string()))?;

        records
            .iter()
            .enumerate()
            .map(|(i, record)| {
                let obj = record
                    .as_object()
                    .ok_or_else(|| JobError::Parse(format!("record {i} is not an object")))?;
                for key in &self.source.conflict_keys {
                    if obj.get(key).map_or(true, |v| v.is_null()) {
                        return Err(JobError::Parse(format!(
                            "record {i} has no value for key column {key}"
                        )));
                    }
                }
                Ok(self
                    .source
                    .columns
                    .iter()
                    .map(|c| json_to_sql(obj.get(c)))
                    .collect())
            })
            .collect()
    }
}

fn json_to_sql(v: Option<&serde_json::Value>) -> Value {
    match v {
        None | Some(serde_json::Value::Null) => Value::Null,
        Some(serde_json::Value::Bool(b)) => Value::Integer(*b as i64),
        Some(serde_json::Value::Number(n)) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => n.as_f64().map_or(Value::Null, Value::Real),
        },
        Some(serde_json::Value::String(s)) => Value::Text(s.clone()),
        Some(other) => Value::Text(other.to_string()),
    }
}

#[async_trait]
impl Job for JsonFeedJob {
    fn name(&self) -> &str {
        &self.source.name
    }

    fn storage_target(&self) -> &str {
        &self.source.table
    }

    fn category(&self) -> Category {
        self.source.category
    }

    fn cadence(&self) -> Cadence {
        self.source.cadence
    }

    fn is_due(&self, now: DateTime<Utc>, last_success: Option<DateTime<Utc>>) -> bool {
        self.source.due.is_due(now, last_success)
    }

    async fn execute(&self, jc: &JobContext) -> Result<RunOutcome, JobError> {
        let path = jc.work_dir.join(format!("{}.json", self.source.name));
        let file_bytes = jc
            .fetcher
            .download_to_file(&jc.ctx, &self.source.url, &path)
            .await?;
        let raw = jc.ctx.run(tokio::fs::read(&path)).await??;
        let sha256 = hex::encode(Sha256::digest(&raw));
        debug!(parent: &jc.span, file_bytes, %sha256, "feed downloaded");

        let rows = self.rows_from_json(&raw)?;
        let records = rows.len();
        let rows = dedupe_by_keys(&self.upsert, rows)?;

        jc.warehouse
            .ensure_table(&self.upsert.table, &self.upsert.columns, &self.upsert.conflict_keys)?;
        let affected = jc.warehouse.bulk_upsert(&jc.ctx, &self.upsert, &rows)?;
        info!(parent: &jc.span, records, unique = rows.len(), affected, table = %self.upsert.table, "feed loaded");

        Ok(RunOutcome::new(affected as i64)
            .with_metadata("records", records)
            .with_metadata("file_bytes", file_bytes)
            .with_metadata("sha256", sha256))
    }
}
