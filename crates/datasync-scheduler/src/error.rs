use datasync_core::{ContextError, CoreError};
use datasync_fetch::FetchError;
use datasync_warehouse::WarehouseError;
use thiserror::Error;

/// Errors raised by the registry, the run ledger and the engine itself.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Two jobs were registered under the same name.
    #[error("Duplicate job name: {name}")]
    DuplicateJob { name: String },

    /// No job with the given name is registered.
    #[error("Job not found: {name}")]
    JobNotFound { name: String },

    /// A selection named jobs that are not registered. Nothing was selected.
    #[error("Unknown job(s): {}", names.join(", "))]
    UnknownJobs { names: Vec<String> },

    /// The category filter could not be parsed.
    #[error("Invalid category filter: {0}")]
    InvalidCategory(String),

    /// `complete`/`fail` on a run that is missing or already terminal.
    #[error("Run {id} is not in the started state")]
    InvalidTransition { id: i64 },

    #[error("Run not found: {id}")]
    RunNotFound { id: i64 },

    /// The shared context was done at the fan-out boundary.
    #[error(transparent)]
    Context(#[from] ContextError),
}

impl From<CoreError> for SchedulerError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::UnknownCategory(s) => SchedulerError::InvalidCategory(s),
            other => SchedulerError::InvalidCategory(other.to_string()),
        }
    }
}

impl SchedulerError {
    /// Whether this error came from job selection (bad names or category).
    pub fn is_selection(&self) -> bool {
        matches!(
            self,
            SchedulerError::UnknownJobs { .. } | SchedulerError::InvalidCategory(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Failure inside a job's `execute`. Its display text is stored in the ledger.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("warehouse write failed: {0}")]
    Warehouse(#[from] WarehouseError),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),
}

impl JobError {
    /// The context error behind this failure, however deeply it was wrapped.
    pub fn context_error(&self) -> Option<ContextError> {
        match self {
            JobError::Context(e) => Some(*e),
            JobError::Fetch(FetchError::Context(e)) => Some(*e),
            JobError::Warehouse(WarehouseError::Context(e)) => Some(*e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for JobError {
    fn from(e: serde_json::Error) -> Self {
        JobError::Parse(e.to_string())
    }
}
