mod agent;
mod cli;
mod command;
mod mqtt;
mod telemetry;

use crate::agent::{Agent, AgentExit, TelemetrySink};
use crate::cli::{Cli, Commands, SimulateArgs};
use crate::mqtt::{BrokerOpts, MqttSink};
use crate::telemetry::{round2, sample_value, unix_now, SensorIdentity, TelemetryRecord};
use anyhow::{Context, Result};
use clap::Parser;
use rumqttc::QoS;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::sleep;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,sensor_agent=info".into());
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

    let identity = SensorIdentity::new(
        cli.sensor.clone(),
        cli.sensor_id.clone(),
        cli.topic_prefix.clone(),
    );
    let broker = BrokerOpts {
        host: cli.broker.clone(),
        port: cli.port,
        username: cli.username.clone(),
        password: cli.password.clone(),
    };

    match cli.command {
        Commands::Listen => listen(broker, identity).await,
        Commands::Send(args) => send_once(broker, identity, args.value).await,
        Commands::Simulate(args) => simulate(broker, identity, args).await,
    }
}

/// Command mode: subscribe to this agent's command topics and serve
/// measurement runs until shut down. A lost broker connection abandons any
/// in-flight run and reconnects from scratch.
async fn listen(broker: BrokerOpts, identity: SensorIdentity) -> Result<()> {
    let client_id = format!("sensor-agent-{}", identity.sensor_id);
    loop {
        let (client, eventloop) = mqtt::connect(&broker, &client_id).await?;
        for topic in identity.command_topics() {
            client.subscribe(topic.clone(), QoS::AtLeastOnce).await?;
            tracing::info!(topic = %topic, "subscribed to command topic");
        }

        let (events_tx, mut events_rx) = mpsc::channel(32);
        let poller = mqtt::spawn_command_poller(eventloop, events_tx);
        let mut agent = Agent::new(identity.clone(), MqttSink::new(client.clone()));

        let exit = tokio::select! {
            exit = agent.run(&mut events_rx) => exit,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                poller.abort();
                client.disconnect().await.ok();
                return Ok(());
            }
        };
        poller.abort();

        match exit {
            AgentExit::ConnectionLost | AgentExit::ChannelClosed => {
                tracing::warn!("broker connection lost; reconnecting");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn send_once(broker: BrokerOpts, identity: SensorIdentity, value: f64) -> Result<()> {
    let client_id = format!("sensor-agent-{}", identity.sensor_id);
    let (client, eventloop) = mqtt::connect(&broker, &client_id).await?;
    let poller = mqtt::spawn_drain_poller(eventloop);

    let sink = MqttSink::new(client.clone());
    let topic = identity.telemetry_topic();
    let record = TelemetryRecord {
        timestamp: unix_now(),
        value: round2(value),
        sensor_type: identity.sensor_type.clone(),
    };
    sink.publish(&topic, serde_json::to_vec(&record)?).await?;
    tracing::info!(topic = %topic, value = record.value, "reading sent");

    // Give the event loop a moment to flush before closing.
    sleep(Duration::from_millis(500)).await;
    client.disconnect().await.ok();
    poller.abort();
    Ok(())
}

/// Free-running simulation, no command control: one reading every
/// `interval` seconds until `duration` elapses or ctrl-c.
async fn simulate(broker: BrokerOpts, identity: SensorIdentity, args: SimulateArgs) -> Result<()> {
    let client_id = format!("sensor-agent-{}", identity.sensor_id);
    let (client, eventloop) = mqtt::connect(&broker, &client_id).await?;
    let poller = mqtt::spawn_drain_poller(eventloop);

    let sink = MqttSink::new(client.clone());
    let topic = identity.telemetry_topic();
    let duration = Duration::from_secs(args.duration);
    let interval = Duration::try_from_secs_f64(args.interval.max(0.0))
        .context("simulation interval out of range")?;
    let started = Instant::now();
    let mut readings = 0u64;

    tracing::info!(
        duration_secs = args.duration,
        interval = ?interval,
        base = args.base,
        variance = args.variance,
        "starting simulation"
    );

    while started.elapsed() < duration {
        let record = TelemetryRecord {
            timestamp: unix_now(),
            value: sample_value(args.base, args.variance, &mut rand::thread_rng()),
            sensor_type: identity.sensor_type.clone(),
        };
        sink.publish(&topic, serde_json::to_vec(&record)?).await?;
        readings += 1;
        tracing::debug!(topic = %topic, value = record.value, "published reading");

        tokio::select! {
            _ = sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
        }
    }

    tracing::info!(
        readings,
        elapsed_secs = started.elapsed().as_secs(),
        "simulation complete"
    );
    client.disconnect().await.ok();
    poller.abort();
    Ok(())
}
