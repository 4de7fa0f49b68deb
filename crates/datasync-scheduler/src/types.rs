use std::collections::HashSet;

use chrono::{DateTime, Utc};
use datasync_core::Category;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Lifecycle state of one ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Id assigned, no terminal outcome yet: in flight or abandoned.
    Started,
    /// Finished successfully; `rows_affected` is set.
    Completed,
    /// Execution returned an error; `error_text` is set.
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Started => "started",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A persisted job invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: i64,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub rows_affected: Option<i64>,
    pub error_text: Option<String>,
}

impl RunRecord {
    pub fn status(&self) -> RunStatus {
        match (&self.completed_at, &self.error_text) {
            (None, _) => RunStatus::Started,
            (Some(_), Some(_)) => RunStatus::Failed,
            (Some(_), None) => RunStatus::Completed,
        }
    }
}

/// What a single `Engine::run` call should do.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Execute every selected job regardless of due-ness.
    pub force: bool,
    pub category: Option<Category>,
    pub names: Option<HashSet<String>>,
}

impl RunOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }

    /// Build options from raw CLI-style input.
    ///
    /// An unparseable category is a selection error; an empty name list
    /// means "no name restriction".
    pub fn parse(force: bool, category: Option<&str>, names: &[String]) -> Result<Self> {
        let category = category.map(str::parse::<Category>).transpose()?;
        let names = if names.is_empty() {
            None
        } else {
            Some(names.iter().cloned().collect())
        };
        Ok(Self {
            force,
            category,
            names,
        })
    }
}
