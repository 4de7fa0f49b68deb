//! `datasync-warehouse`: the storage capability handed to every job.
//!
//! A single SQLite database is shared by all jobs through a cloneable
//! [`Warehouse`] handle. Connectors write through [`Warehouse::bulk_upsert`],
//! which performs insert-or-update keyed on a configurable set of columns.

pub mod error;
pub mod upsert;
pub mod warehouse;

pub use error::{Result, WarehouseError};
pub use rusqlite::types::Value;
pub use upsert::{dedupe_by_keys, UpsertConfig};
pub use warehouse::Warehouse;
