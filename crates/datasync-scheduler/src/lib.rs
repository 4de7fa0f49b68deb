//! `datasync-scheduler`: orchestration core for warehouse refresh jobs.
//!
//! # Overview
//!
//! Each data source is a [`Job`]. Jobs are held in a [`Registry`] in
//! registration order. The [`Engine`] selects jobs by category and/or name,
//! asks each one whether it is due given the last successful run recorded in
//! the SQLite-backed [`Ledger`], and executes the due ones concurrently under
//! a shared [`RunContext`](datasync_core::RunContext).
//!
//! # Run lifecycle
//!
//! | Step      | Ledger effect                                   |
//! |-----------|-------------------------------------------------|
//! | Skipped   | none                                            |
//! | Started   | new row, fresh id, `started_at = now`           |
//! | Completed | `completed_at` + `rows_affected` set            |
//! | Failed    | `completed_at` + `error_text` set               |
//!
//! # Due rules
//!
//! The [`cadence`] module holds pure predicates (`daily_schedule`,
//! `weekly_schedule`, `monthly_schedule`, `annual_after`,
//! `quarterly_after_delay`, `quarterly_with_lag`) that jobs call from
//! [`Job::is_due`].

pub mod cadence;
pub mod db;
pub mod engine;
pub mod error;
pub mod job;
pub mod ledger;
pub mod registry;
pub mod types;

pub use cadence::DueRule;
pub use engine::Engine;
pub use error::{JobError, Result, SchedulerError};
pub use job::{Job, JobContext};
pub use ledger::Ledger;
pub use registry::Registry;
pub use types::{RunOptions, RunRecord, RunStatus};
