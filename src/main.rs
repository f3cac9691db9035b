//! process-link daemon
//!
//! Restores the stored connections, polls the ones flagged `auto_connect` and
//! logs every batch until interrupted.
//!
//! Run with: cargo run -- --config config.toml
//!
//! # Configuration
//!
//! See `process-link --generate-config`. `RUST_LOG` takes precedence over the
//! configured log level.

use anyhow::Context;
use clap::Parser;
use process_link::config::{generate_default_config, Config, LoggingConfig};
use process_link::{ChannelSink, ConnectionManager, ConnectionRegistry, SqliteStore};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser)]
#[command(name = "process-link")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Polls process data from device connections")]
struct Cli {
    /// Config file (default: search the standard locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the connection database path
    #[arg(long)]
    database: Option<PathBuf>,

    /// Print a commented default config and exit
    #[arg(long)]
    generate_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.generate_config {
        print!("{}", generate_default_config());
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_tracing(&config.logging)?;

    tracing::info!("Starting process-link v{}", env!("CARGO_PKG_VERSION"));

    let database = cli
        .database
        .unwrap_or_else(|| PathBuf::from(&config.storage.database));
    let store = SqliteStore::open(&database)
        .with_context(|| format!("opening connection database {:?}", database))?;

    let (sink, mut batches) = ChannelSink::new();
    let manager = Arc::new(ConnectionManager::new(
        ConnectionRegistry::with_builtin(),
        Arc::new(sink),
        config.manager_config(),
    ));
    let monitor = manager.start_fault_monitor();

    let restored = manager.restore(&store).await?;
    tracing::info!("{} connections restored from {:?}", restored, database);

    let logger = tokio::spawn(async move {
        while let Some(batch) = batches.recv().await {
            for (tag_id, samples) in batch.samples.iter() {
                for sample in samples {
                    match sample.as_value() {
                        Some(value) => tracing::info!(
                            connection_id = %batch.connection_id,
                            tag_id = %tag_id,
                            timestamp = %sample.timestamp,
                            "{}", value
                        ),
                        None => tracing::warn!(
                            connection_id = %batch.connection_id,
                            tag_id = %tag_id,
                            "No value this cycle"
                        ),
                    }
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    manager.shutdown().await;
    tracing::info!("{}", manager.summary().await);
    monitor.abort();
    logger.abort();

    tracing::info!("process-link shutdown complete");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("process_link={}", logging.level)));

    let writer = match &logging.file {
        Some(path) => BoxMakeWriter::new(Mutex::new(open_log_file(Path::new(path))?)),
        None => BoxMakeWriter::new(std::io::stdout),
    };

    let fmt = tracing_subscriber::fmt::layer().with_writer(writer);
    let layer = match logging.format.as_str() {
        "json" => fmt.json().boxed(),
        _ => fmt.pretty().boxed(),
    };

    tracing_subscriber::registry().with(filter).with(layer).init();
    Ok(())
}

fn open_log_file(path: &Path) -> anyhow::Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {:?}", path))
}
