use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
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

#[derive(Debug, thiserror::Error)]
#[error("could not connect to {host}:{port} within {timeout:?}")]
pub struct ConnectTimeout {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
}

/// Opens a broker connection and waits for the CONNACK under a bounded
/// timeout. The caller decides whether to retry.
pub async fn connect(
    opts: &BrokerOpts,
    client_id: &str,
) -> Result<(AsyncClient, EventLoop, Arc<AtomicBool>), ConnectTimeout> {
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
        return Err(ConnectTimeout {
            host: opts.host.clone(),
            port: opts.port,
            timeout: CONNECT_TIMEOUT,
        });
    }

    tracing::info!(host = %opts.host, port = opts.port, "connected to MQTT broker");
    let connected = Arc::new(AtomicBool::new(true));
    Ok((client, eventloop, connected))
}

/// Keeps the event loop turning so outbound publishes are flushed; drops the
/// connected flag on the first connection error.
pub fn spawn_drain_poller(
    mut eventloop: EventLoop,
    connected: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(err) = eventloop.poll().await {
                connected.store(false, Ordering::SeqCst);
                tracing::warn!(error = %err, "broker connection lost");
                break;
            }
        }
    })
}
