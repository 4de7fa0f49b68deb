//! `datasync-core`: types and plumbing shared by every datasync crate.

pub mod config;
pub mod context;
pub mod error;
pub mod types;

pub use context::RunContext;
pub use error::{ContextError, CoreError};
pub use types::{Cadence, Category, RunOutcome};
