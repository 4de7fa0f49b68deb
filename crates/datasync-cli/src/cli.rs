//! Command-line arguments.

use clap::{Parser, Subcommand, ValueEnum};

/// Version string shown by `--version`: crate version plus git commit.
pub const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("DATASYNC_GIT_SHA"),
    ")"
);

#[derive(Debug, Clone, Parser)]
#[command(
    name = "datasync",
    version = VERSION,
    about = "Refresh warehouse tables from independently scheduled data sources.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Falls back to `DATASYNC_CONFIG`, then `~/.datasync/datasync.toml`.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<String>,

    /// Logging level for datasync crates. Overrides `RUST_LOG` when given.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run every selected job that is due.
    Run {
        /// Run selected jobs even if they are not due.
        #[arg(long)]
        force: bool,

        /// Only jobs in this category (tier1..tier4).
        #[arg(long, value_name = "CATEGORY")]
        category: Option<String>,

        /// Only these jobs. Repeatable.
        #[arg(long = "job", value_name = "NAME")]
        jobs: Vec<String>,
    },

    /// List registered jobs in registration order.
    List,

    /// Show recent ledger entries.
    History {
        /// Only runs of this job.
        #[arg(long, value_name = "NAME")]
        job: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}
