use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = concat!("datasync/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 300;
pub const ENV_PREFIX: &str = "DATASYNC_";

/// Top-level config (datasync.toml + DATASYNC_* env overrides).
///
/// Connector definitions (`[[sources]]`) live in the same file but are
/// extracted by the binary, which owns the connector types.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasyncConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file shared by the warehouse tables and the run ledger.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Scratch directory handed to every job for downloads.
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
    /// Deadline for a whole run. `None` means no deadline.
    #[serde(default)]
    pub deadline_secs: Option<u64>,
    /// Maximum jobs executing at once. 0 = one task per selected job, unbounded.
    #[serde(default)]
    pub max_concurrency: usize,
    /// Fail ledger rows left in `started` by a previous process.
    #[serde(default)]
    pub reap_abandoned_on_start: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            deadline_secs: None,
            max_concurrency: 0,
            reap_abandoned_on_start: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
        }
    }
}

fn data_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.datasync", home)
}
fn default_db_path() -> String {
    format!("{}/warehouse.db", data_dir())
}
fn default_work_dir() -> String {
    format!("{}/work", data_dir())
}
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}
fn default_fetch_timeout() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

/// Default config location: `~/.datasync/datasync.toml`.
pub fn default_config_path() -> String {
    format!("{}/datasync.toml", data_dir())
}

/// Layered provider: TOML file first, then `DATASYNC_*` env vars.
///
/// Nested keys use a double underscore, e.g. `DATASYNC_ENGINE__MAX_CONCURRENCY=4`.
pub fn figment(config_path: Option<&str>) -> Figment {
    let path = config_path
        .map(String::from)
        .unwrap_or_else(default_config_path);
    Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

impl DatasyncConfig {
    /// Extract the typed config from a layered provider (see [`figment`]).
    pub fn from_figment(figment: &Figment) -> crate::error::Result<Self> {
        figment
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))
    }
}
