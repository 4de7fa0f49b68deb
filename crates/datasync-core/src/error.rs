use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

}

/// Why a [`RunContext`](crate::context::RunContext) stopped accepting work.
///
/// The display strings are what ends up in the run ledger when a job returns
/// because its context expired, so keep them stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

pub type Result<T> = std::result::Result<T, CoreError>;
