use datasync_core::ContextError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("invalid upsert config for {table}: {reason}")]
    InvalidConfig { table: String, reason: String },

    #[error("row {index} has {got} values, expected {expected}")]
    RowShape {
        index: usize,
        expected: usize,
        got: usize,
    },

    /// Two rows in one batch share a conflict key; callers must dedupe first.
    #[error("duplicate conflict key in batch for {table}: {key}")]
    DuplicateConflictKey { table: String, key: String },

    #[error(transparent)]
    Context(#[from] ContextError),
}

pub type Result<T> = std::result::Result<T, WarehouseError>;
