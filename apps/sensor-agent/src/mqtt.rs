use crate::command;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct BrokerOpts {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("could not connect to {host}:{port} within {timeout:?}")]
    ConnectTimeout {
        host: String,
        port: u16,
        timeout: Duration,
    },
    #[error("publish failed: {0}")]
    Publish(#[from] rumqttc::ClientError),
}

/// What the bus poller hands to the agent loop: a validated command, or
/// notice that the broker connection is gone.
#[derive(Debug)]
pub enum AgentEvent {
    Command(command::CommandEnvelope),
    ConnectionLost,
}

/// Opens a broker connection and waits for the CONNACK under a bounded
/// timeout. Retrying a timed-out connect is the caller's decision.
pub async fn connect(
    opts: &BrokerOpts,
    client_id: &str,
) -> Result<(AsyncClient, EventLoop), BusError> {
    let mut mqttoptions = MqttOptions::new(client_id, opts.host.clone(), opts.port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    if let Some(username) = &opts.username {
        mqttoptions.set_credentials(username.clone(), opts.password.clone().unwrap_or_default());
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 64);
    let connack = tokio::time::timeout(CONNECT_TIMEOUT, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => break,
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(error = %err, "waiting for broker connection");
                    sleep(Duration::from_millis(250)).await;
                }
            }
        }
    })
    .await;

    if connack.is_err() {
        return Err(BusError::ConnectTimeout {
            host: opts.host.clone(),
            port: opts.port,
            timeout: CONNECT_TIMEOUT,
        });
    }

    tracing::info!(host = %opts.host, port = opts.port, "connected to MQTT broker");
    Ok((client, eventloop))
}

/// Polls the event loop and forwards parsed commands onto the agent's
/// channel. Malformed payloads are logged and discarded here so the agent
/// loop only ever sees valid envelopes.
pub fn spawn_command_poller(
    mut eventloop: EventLoop,
    events: mpsc::Sender<AgentEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    match command::parse_command(&publish.payload) {
                        Ok(envelope) => {
                            tracing::info!(topic = %publish.topic, envelope = ?envelope, "received command");
                            if events.send(AgentEvent::Command(envelope)).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(
                                error = %err,
                                topic = %publish.topic,
                                payload = %String::from_utf8_lossy(&publish.payload),
                                "discarding malformed command"
                            );
                        }
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "broker connection lost");
                    let _ = events.send(AgentEvent::ConnectionLost).await;
                    break;
                }
            }
        }
    })
}

/// Keeps the event loop turning for the send/simulate modes, which publish
/// but never consume inbound messages.
pub fn spawn_drain_poller(mut eventloop: EventLoop) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(err) = eventloop.poll().await {
                tracing::warn!(error = %err, "broker connection lost");
                break;
            }
        }
    })
}

/// Production telemetry sink over the shared MQTT client.
#[derive(Clone)]
pub struct MqttSink {
    client: AsyncClient,
}

impl MqttSink {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

impl crate::agent::TelemetrySink for MqttSink {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }
}
