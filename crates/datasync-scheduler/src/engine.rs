use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use datasync_core::{ContextError, RunContext};
use datasync_fetch::Fetcher;
use datasync_warehouse::Warehouse;
use futures_util::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::{
    error::{JobError, Result},
    job::{Job, JobContext},
    ledger::Ledger,
    registry::Registry,
    types::RunOptions,
};

/// Drives one orchestration pass: select jobs, decide due-ness, execute the
/// due ones concurrently, and record every outcome in the ledger.
///
/// A job's failure is recorded and contained; it never aborts its siblings
/// and never becomes the return value of [`Engine::run`].
pub struct Engine {
    registry: Registry,
    ledger: Ledger,
    warehouse: Warehouse,
    fetcher: Arc<dyn Fetcher>,
    work_dir: PathBuf,
    /// 0 = one concurrent task per selected job.
    max_concurrency: usize,
    /// Parent of every per-job span.
    span: Span,
}

impl Engine {
    pub fn new(
        registry: Registry,
        ledger: Ledger,
        warehouse: Warehouse,
        fetcher: Arc<dyn Fetcher>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            ledger,
            warehouse,
            fetcher,
            work_dir: work_dir.into(),
            max_concurrency: 0,
            span: Span::current(),
        }
    }

    /// Bound the number of jobs executing at once.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Log handle threaded into every job (as the parent of its span).
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Run every selected job that is due (or all of them when forced).
    ///
    /// Errors are structural only: a bad selection, or the shared context
    /// being done before dispatch or by the time all tasks have finished.
    pub async fn run(&self, ctx: &RunContext, options: &RunOptions) -> Result<()> {
        let jobs = self
            .registry
            .select(options.category, options.names.as_ref())?;
        if jobs.is_empty() {
            info!("no jobs selected");
            return Ok(());
        }
        ctx.check()?;

        let limiter = (self.max_concurrency > 0).then(|| Arc::new(Semaphore::new(self.max_concurrency)));
        info!(
            jobs = jobs.len(),
            force = options.force,
            max_concurrency = self.max_concurrency,
            "dispatching jobs"
        );

        let mut tasks = JoinSet::new();
        for job in jobs {
            let span = info_span!(parent: &self.span, "job", name = %job.name());
            let task = JobTask {
                job,
                ctx: ctx.clone(),
                ledger: self.ledger.clone(),
                warehouse: self.warehouse.clone(),
                fetcher: Arc::clone(&self.fetcher),
                work_dir: self.work_dir.clone(),
                force: options.force,
                limiter: limiter.clone(),
                span: span.clone(),
            };
            tasks.spawn(task.run().instrument(span));
        }

        let mut tally = Tally::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => tally.add(outcome),
                Err(e) => {
                    // Panics inside `execute` are caught in the task; this is
                    // the runtime aborting the task itself.
                    error!(error = %e, "job task aborted");
                    tally.aborted += 1;
                }
            }
        }

        info!(
            completed = tally.completed,
            failed = tally.failed,
            skipped = tally.skipped,
            ledger_errors = tally.ledger_errors,
            aborted = tally.aborted,
            "run finished"
        );

        match ctx.error() {
            Some(e) => {
                warn!(error = %e, "run context ended before all jobs finished");
                Err(e.into())
            }
            None => Ok(()),
        }
    }
}

/// Terminal state of one job task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskOutcome {
    Skipped,
    Completed,
    Failed,
    /// The ledger could not record the start or the outcome.
    LedgerError,
}

#[derive(Debug, Default)]
struct Tally {
    completed: usize,
    failed: usize,
    skipped: usize,
    ledger_errors: usize,
    aborted: usize,
}

impl Tally {
    fn add(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Skipped => self.skipped += 1,
            TaskOutcome::Completed => self.completed += 1,
            TaskOutcome::Failed => self.failed += 1,
            TaskOutcome::LedgerError => self.ledger_errors += 1,
        }
    }
}

/// Everything one spawned task owns.
struct JobTask {
    job: Arc<dyn Job>,
    ctx: RunContext,
    ledger: Ledger,
    warehouse: Warehouse,
    fetcher: Arc<dyn Fetcher>,
    work_dir: PathBuf,
    force: bool,
    limiter: Option<Arc<Semaphore>>,
    span: Span,
}

impl JobTask {
    async fn run(self) -> TaskOutcome {
        let name = self.job.name().to_string();

        if self.force {
            debug!("forced, skipping due check");
        } else {
            let last_success = self.ledger.last_success(&name);
            if !self.job.is_due(Utc::now(), last_success) {
                debug!(last_success = ?last_success, "not due");
                return TaskOutcome::Skipped;
            }
        }

        let permit = self.acquire().await;

        let id = match self.ledger.start(&name) {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "could not record run start");
                return TaskOutcome::LedgerError;
            }
        };

        let result = match permit {
            Ok(_permit) => self.execute(id).await,
            Err(e) => Err(JobError::Context(e)),
        };

        self.record(id, result)
    }

    /// Wait for a worker slot, giving up if the context ends first.
    async fn acquire(&self) -> std::result::Result<Option<OwnedSemaphorePermit>, ContextError> {
        match &self.limiter {
            None => Ok(None),
            // A closed semaphore only happens on shutdown; run unbounded.
            Some(sem) => Ok(self.ctx.run(Arc::clone(sem).acquire_owned()).await?.ok()),
        }
    }

    async fn execute(&self, id: i64) -> std::result::Result<datasync_core::RunOutcome, JobError> {
        let jc = JobContext {
            ctx: self.ctx.clone(),
            warehouse: self.warehouse.clone(),
            fetcher: Arc::clone(&self.fetcher),
            work_dir: self.work_dir.clone(),
            span: self.span.clone(),
        };
        info!(run_id = id, "job started");
        let started = Instant::now();
        let result = AssertUnwindSafe(self.job.execute(&jc))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(JobError::Failed(format!(
                    "job panicked: {}",
                    panic_message(panic.as_ref())
                )))
            });
        debug!(run_id = id, elapsed_ms = started.elapsed().as_millis() as u64, "job returned");
        result
    }

    fn record(
        &self,
        id: i64,
        result: std::result::Result<datasync_core::RunOutcome, JobError>,
    ) -> TaskOutcome {
        let now = Utc::now();
        match result {
            Ok(outcome) => match self.ledger.complete(id, outcome.rows_affected, now) {
                Ok(()) => {
                    info!(
                        run_id = id,
                        rows = outcome.rows_affected,
                        metadata = ?outcome.metadata,
                        "job completed"
                    );
                    TaskOutcome::Completed
                }
                Err(e) => {
                    error!(run_id = id, error = %e, "could not record completion");
                    TaskOutcome::LedgerError
                }
            },
            Err(job_err) => {
                let text = job_err.to_string();
                match job_err.context_error() {
                    Some(cause) => {
                        warn!(run_id = id, error = %text, %cause, "job stopped by run context")
                    }
                    None => warn!(run_id = id, error = %text, "job failed"),
                }
                match self.ledger.fail(id, &text, now) {
                    Ok(()) => TaskOutcome::Failed,
                    Err(e) => {
                        error!(run_id = id, error = %e, "could not record failure");
                        TaskOutcome::LedgerError
                    }
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
