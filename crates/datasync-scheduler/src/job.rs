use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use datasync_core::{Cadence, Category, RunContext, RunOutcome};
use datasync_fetch::Fetcher;
use datasync_warehouse::Warehouse;

use crate::error::JobError;

/// Everything a job receives when the engine executes it.
///
/// `ctx` is shared by every job in the pass: long-running work must race
/// against it (see [`RunContext::run`]) so cancellation is observed promptly.
/// `span` is the job's own tracing span; connectors log inside it rather
/// than through a process-wide handle.
pub struct JobContext {
    pub ctx: RunContext,
    pub warehouse: Warehouse,
    pub fetcher: Arc<dyn Fetcher>,
    pub work_dir: PathBuf,
    pub span: tracing::Span,
}

/// Common interface implemented by every data-source connector.
///
/// A job is constructed once at startup and then shared read-only. The engine
/// never runs the same job twice concurrently within one pass.
#[async_trait]
pub trait Job: Send + Sync {
    /// Stable identifier, unique across the registry and used as the ledger key.
    fn name(&self) -> &str;

    /// Where the job's output lands. Informational only.
    fn storage_target(&self) -> &str;

    fn category(&self) -> Category;

    fn cadence(&self) -> Cadence;

    /// Whether a run is due given the start time of the last successful run.
    fn is_due(&self, now: DateTime<Utc>, last_success: Option<DateTime<Utc>>) -> bool;

    /// Do the actual work. Errors are recorded to the ledger by the engine.
    async fn execute(&self, jc: &JobContext) -> Result<RunOutcome, JobError>;
}
