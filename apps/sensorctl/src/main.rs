mod cli;
mod dispatch;
mod mqtt;

use crate::cli::{Cli, Commands};
use crate::dispatch::{CommandEnvelope, Dispatcher};
use crate::mqtt::BrokerOpts;
use anyhow::Result;
use clap::Parser;
use std::time::Duration;
use tokio::time::sleep;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,sensorctl=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing()?;

    let envelope = match cli.command {
        Commands::Measure(args) => CommandEnvelope::Measure {
            count: args.count,
            interval: args.interval,
            base: args.base,
            variance: args.variance,
        },
        Commands::Stop => CommandEnvelope::Stop,
    };
    envelope.validate()?;

    let broker = BrokerOpts {
        host: cli.broker,
        port: cli.port,
        username: cli.username,
        password: cli.password,
    };
    let client_id = format!("sensorctl-{}", std::process::id());
    let (client, eventloop, connected) = mqtt::connect(&broker, &client_id).await?;
    let poller = mqtt::spawn_drain_poller(eventloop, connected.clone());

    let dispatcher = Dispatcher::new(client.clone(), connected);
    dispatcher.dispatch(&cli.sensor_id, &envelope).await?;

    // Give the event loop a moment to flush the publish before closing.
    sleep(Duration::from_millis(500)).await;
    client.disconnect().await.ok();
    poller.abort();
    Ok(())
}
