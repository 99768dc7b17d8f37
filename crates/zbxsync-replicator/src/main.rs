//! zbxsync - Zabbix to InfluxDB replicator

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use zbxsync_common::logging::{init_logging, LogLevel};
use zbxsync_common::time::format_timestamp;
use zbxsync_replicator::{
    CheckpointStore, Config, InfluxLoader, Scheduler, SqlExtractor, SystemClock,
};

#[derive(Parser, Debug)]
#[command(name = "zbxsync")]
#[command(author, version, about = "Replicate Zabbix history and trends into InfluxDB")]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "ZBXSYNC_CONFIG", default_value = "zbxsync.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;

    // Environment variables take precedence over the [logging] section
    let mut log_config = config.logging.clone().apply_env()?;
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    let guard = init_logging(&log_config)?;
    for note in &config.warnings {
        warn!("{note}");
    }

    let code = match run(config).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "zbxsync failed to start");
            1
        }
    };

    // Flush buffered file output; process::exit skips destructors
    drop(guard);
    std::process::exit(code);
}

async fn run(config: Config) -> Result<i32> {
    let (dialect, source) = config.source()?;
    let streams = config.active_streams();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting zbxsync");
    info!(
        provider = %dialect,
        influxdb = %config.influxdb.url,
        database = %config.influxdb.database,
        registry = %config.registry.file_name.display(),
        "Replication targets"
    );
    for stream in &streams {
        info!(
            stream = %stream.name,
            interval_secs = stream.interval,
            hours_per_batch = stream.hours_per_batch,
            output_rows_per_batch = stream.output_rows_per_batch,
            input_rows_per_batch = ?stream.input_rows_per_batch,
            "Active table"
        );
    }

    // Inactive tables are seeded too, so enabling one later resumes from its start_date
    let store = CheckpointStore::load(
        &config.registry.file_name,
        &config.all_streams(),
        Utc::now(),
    )
    .await
    .context("Failed to load checkpoint registry")?;
    for (stream, watermark) in store.watermarks().await {
        info!(stream = %stream, watermark = %format_timestamp(watermark), "Resuming");
    }

    let extractor = SqlExtractor::connect_lazy(
        &source.address,
        dialect,
        source.max_connections,
        source.timeout(),
    )
    .context("Failed to configure Zabbix database pool")?;
    let loader = InfluxLoader::new(&config.influxdb).context("Failed to build InfluxDB client")?;

    let shutdown = Scheduler::from_streams(
        streams,
        Arc::new(store),
        Arc::new(extractor),
        Arc::new(loader),
        Arc::new(SystemClock),
    )
    .run()
    .await;

    info!(?shutdown, exit_code = shutdown.exit_code(), "zbxsync stopped");
    Ok(shutdown.exit_code())
}
