use crate::config::Config;
use crate::ingest::TelemetryIngestor;
use anyhow::Result;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::time::{sleep, Duration};

/// Reconnecting subscriber loop: every telemetry message under the topic
/// prefix is handed to the ingestor; a dropped connection is retried, and a
/// bad message never stops the loop.
pub async fn run_listener(config: Config, ingestor: TelemetryIngestor) -> Result<()> {
    let telemetry_filter = format!("{}/#", config.mqtt_topic_prefix);
    loop {
        let mut mqttoptions = MqttOptions::new(
            config.mqtt_client_id.clone(),
            config.mqtt_host.clone(),
            config.mqtt_port,
        );
        mqttoptions.set_keep_alive(config.mqtt_keepalive());
        if let Some(username) = &config.mqtt_username {
            mqttoptions.set_credentials(
                username.clone(),
                config.mqtt_password.clone().unwrap_or_default(),
            );
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 64);
        let stats = ingestor.stats();

        // Enqueues the subscribe; the connected stat flips only once the
        // broker's CONNACK comes back through the event loop.
        match client
            .subscribe(telemetry_filter.clone(), QoS::AtLeastOnce)
            .await
        {
            Ok(_) => tracing::info!(topic = %telemetry_filter, "subscribing to telemetry feed"),
            Err(err) => {
                tracing::warn!(error = %err, "failed to queue telemetry subscription; retrying");
                sleep(Duration::from_secs(2)).await;
                continue;
            }
        }

        loop {
            match eventloop.poll().await {
                Ok(event) => handle_event(event, &ingestor).await,
                Err(err) => {
                    stats.set_mqtt_connected(false);
                    tracing::warn!(error = %err, "MQTT connection dropped; reconnecting");
                    break;
                }
            }
        }

        sleep(Duration::from_secs(1)).await;
    }
}

async fn handle_event(event: Event, ingestor: &TelemetryIngestor) {
    match event {
        Event::Incoming(Incoming::ConnAck(_)) => {
            tracing::info!("MQTT session established");
            ingestor.stats().set_mqtt_connected(true);
        }
        Event::Incoming(Incoming::Publish(publish)) => {
            let payload = publish.payload.to_vec();
            if let Err(err) = ingestor.handle_message(&publish.topic, payload).await {
                tracing::warn!(error = %err, topic = %publish.topic, "failed to ingest reading");
            }
        }
        _ => {}
    }
}
