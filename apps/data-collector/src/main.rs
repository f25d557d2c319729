mod cli;
mod config;
mod ingest;
mod mqtt;
mod pipeline;
mod store;
mod telemetry;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use config::Config;
use ingest::TelemetryIngestor;
use pipeline::{spawn_writer, IngestStats, WriterHandle};
use std::sync::Arc;
use store::{ReadingsStore, StoredReading};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,data_collector=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Latest => {
            let store = ReadingsStore::open(&config.db_path).await?;
            print_readings(&store.latest_per_topic().await?);
            Ok(())
        }
        Commands::Recent(args) => {
            let store = ReadingsStore::open(&config.db_path).await?;
            print_readings(&store.recent(args.count).await?);
            Ok(())
        }
    }
}

async fn run(config: Config) -> Result<()> {
    let store = ReadingsStore::open(&config.db_path).await?;
    tracing::info!(db = %config.db_path.display(), "opened readings store");

    let stats = Arc::new(IngestStats::new());
    let (tx, rx) = mpsc::channel(config.max_queue);
    let writer = WriterHandle::new(tx, stats.clone());
    let writer_task = spawn_writer(store, rx, stats);
    let ingestor = TelemetryIngestor::new(writer);

    let listener = tokio::spawn(mqtt::run_listener(config, ingestor.clone()));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
        result = listener => {
            match result {
                Ok(Ok(())) => tracing::info!("listener exited"),
                Ok(Err(err)) => tracing::error!(error = %err, "listener failed"),
                Err(err) => tracing::error!(error = %err, "listener task panicked"),
            }
        }
    }

    // Drain whatever the writer has queued before exiting.
    ingestor.flush().await?;
    writer_task.abort();
    Ok(())
}

fn print_readings(rows: &[StoredReading]) {
    if rows.is_empty() {
        println!("no readings stored");
        return;
    }
    println!(
        "{:>6}  {:<28}  {:<20}  {:>18}  {:>10}",
        "id", "topic", "stored_at", "measured_at", "value"
    );
    for row in rows {
        let stored_at = row.system_timestamp.format("%Y-%m-%d %H:%M:%S").to_string();
        println!(
            "{:>6}  {:<28}  {:<20}  {:>18.6}  {:>10.2}",
            row.id, row.topic, stored_at, row.measurement_time, row.value
        );
    }
}
