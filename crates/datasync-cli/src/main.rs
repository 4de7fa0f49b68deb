use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use chrono::Utc;
use clap::Parser;
use datasync_core::config::DatasyncConfig;
use datasync_core::RunContext;
use datasync_fetch::HttpFetcher;
use datasync_scheduler::{Engine, Ledger, Registry, RunOptions, RunRecord};
use datasync_warehouse::Warehouse;
use tracing::{info, info_span, warn};

mod cli;
mod feed;

use cli::{CliArgs, Command};

const DEFAULT_LOG_FILTER: &str =
    "datasync_cli=info,datasync_scheduler=info,datasync_fetch=info,datasync_warehouse=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_tracing(&args);

    // config: --config > DATASYNC_CONFIG env > ~/.datasync/datasync.toml
    let config_path = args
        .config
        .clone()
        .or_else(|| std::env::var("DATASYNC_CONFIG").ok());
    let figment = datasync_core::config::figment(config_path.as_deref());
    let config = DatasyncConfig::from_figment(&figment).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        DatasyncConfig::default()
    });

    let sources = feed::load_sources(&figment).context("invalid [[sources]] in config")?;
    let registry = feed::build_registry(&sources)?;

    match args.command {
        Command::List => {
            list_jobs(&registry);
            Ok(())
        }
        Command::History { job, limit } => {
            let ledger = open_ledger(&config)?;
            for record in ledger.recent(job.as_deref(), limit)? {
                print_record(&record);
            }
            Ok(())
        }
        Command::Run {
            force,
            category,
            jobs,
        } => {
            let options = RunOptions::parse(force, category.as_deref(), &jobs)?;
            run(config, registry, options).await
        }
    }
}

fn init_tracing(args: &CliArgs) {
    let filter = match args.log_level {
        Some(level) => tracing_subscriber::EnvFilter::new(
            DEFAULT_LOG_FILTER.replace("=info", &format!("={}", level.as_str())),
        ),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(config: DatasyncConfig, registry: Registry, options: RunOptions) -> anyhow::Result<()> {
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    let warehouse = Warehouse::open(db_path)
        .with_context(|| format!("failed to open warehouse at {db_path}"))?;
    // One connection for job writes and ledger writes.
    let ledger = Ledger::from_warehouse(&warehouse)?;

    let started = Utc::now();
    if config.engine.reap_abandoned_on_start {
        ledger.reap_abandoned(started)?;
    }

    let fetcher = HttpFetcher::from_config(&config.fetch)?;
    let work_dir = &config.engine.work_dir;
    std::fs::create_dir_all(work_dir)
        .with_context(|| format!("failed to create work dir {work_dir}"))?;

    let engine = Engine::new(registry, ledger.clone(), warehouse, Arc::new(fetcher), work_dir)
        .with_max_concurrency(config.engine.max_concurrency)
        .with_span(info_span!("run", force = options.force));

    let ctx = match config.engine.deadline_secs {
        Some(secs) => RunContext::with_timeout(Duration::from_secs(secs)),
        None => RunContext::new(),
    };

    // Ctrl-C cancels the shared context; running jobs observe it and fail.
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            interrupt.cancel();
        }
    });

    let result = engine.run(&ctx, &options).await;

    let records = ledger.started_since(started)?;
    for record in &records {
        print_record(record);
    }
    info!(runs = records.len(), "run finished");

    result.context("run did not finish")
}

fn open_ledger(config: &DatasyncConfig) -> anyhow::Result<Ledger> {
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    Ledger::open(db_path).with_context(|| format!("failed to open ledger at {db_path}"))
}

fn list_jobs(registry: &Registry) {
    for name in registry.all_names() {
        if let Ok(job) = registry.get(name) {
            println!(
                "{:<24} {:<6} {:<10} {}",
                job.name(),
                job.category().to_string(),
                job.cadence().to_string(),
                job.storage_target()
            );
        }
    }
}

fn print_record(record: &RunRecord) {
    let detail = match (&record.error_text, record.rows_affected) {
        (Some(e), _) => e.clone(),
        (None, Some(rows)) => format!("{rows} rows"),
        (None, None) => String::new(),
    };
    println!(
        "{:>6} {:<24} {:<9} {} {}",
        record.id,
        record.job_name,
        record.status().to_string(),
        record.started_at.to_rfc3339(),
        detail
    );
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
