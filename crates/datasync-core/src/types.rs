use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Coarse pipeline grouping. Only used to filter which jobs a run selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Tier1,
    Tier2,
    Tier3,
    Tier4,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Tier1,
        Category::Tier2,
        Category::Tier3,
        Category::Tier4,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Tier1 => "tier1",
            Category::Tier2 => "tier2",
            Category::Tier3 => "tier3",
            Category::Tier4 => "tier4",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tier1" | "1" => Ok(Category::Tier1),
            "tier2" | "2" => Ok(Category::Tier2),
            "tier3" | "3" => Ok(Category::Tier3),
            "tier4" | "4" => Ok(Category::Tier4),
            _ => Err(CoreError::UnknownCategory(s.to_string())),
        }
    }
}

/// Expected upstream update frequency.
///
/// Informational only: whether a job is due is decided by the job's own
/// predicate, never derived from this label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Annual,
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Cadence::Daily => "daily",
            Cadence::Weekly => "weekly",
            Cadence::Monthly => "monthly",
            Cadence::Quarterly => "quarterly",
            Cadence::Annual => "annual",
        };
        f.write_str(s)
    }
}

/// Result of a successful job execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub rows_affected: i64,
    /// Free-form details for logs; never interpreted by the engine.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl RunOutcome {
    pub fn new(rows_affected: i64) -> Self {
        Self {
            rows_affected,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}
