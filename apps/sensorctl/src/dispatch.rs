use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Target value accepted by every agent's broadcast subscription.
pub const BROADCAST_TARGET: &str = "all";

/// Command body published to `commands/{target}`. The wire shape is shared
/// with the agents and must stay bit-exact: `stop` carries no measurement
/// parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum CommandEnvelope {
    Measure {
        count: u32,
        interval: f64,
        base: f64,
        variance: f64,
    },
    Stop,
}

impl CommandEnvelope {
    pub fn validate(&self) -> Result<(), DispatchError> {
        if let CommandEnvelope::Measure {
            count,
            interval,
            variance,
            ..
        } = self
        {
            if *count == 0 {
                return Err(DispatchError::InvalidCommand("count must be positive"));
            }
            if !interval.is_finite() || *interval < 0.0 {
                return Err(DispatchError::InvalidCommand(
                    "interval must be non-negative",
                ));
            }
            if !variance.is_finite() || *variance < 0.0 {
                return Err(DispatchError::InvalidCommand(
                    "variance must be non-negative",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("not connected to broker")]
    NotConnected,
    #[error("invalid command: {0}")]
    InvalidCommand(&'static str),
    #[error("publish failed: {0}")]
    Publish(#[from] rumqttc::ClientError),
    #[error("could not encode command envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

pub fn command_topic(target: &str) -> String {
    format!("commands/{target}")
}

pub struct Dispatcher {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

impl Dispatcher {
    pub fn new(client: AsyncClient, connected: Arc<AtomicBool>) -> Self {
        Self { client, connected }
    }

    /// Publishes one command envelope to `commands/{target}`. Exactly one
    /// publish per call; retries are the caller's concern.
    pub async fn dispatch(
        &self,
        target: &str,
        envelope: &CommandEnvelope,
    ) -> Result<(), DispatchError> {
        envelope.validate()?;
        if !self.connected.load(Ordering::SeqCst) {
            return Err(DispatchError::NotConnected);
        }
        let topic = command_topic(target);
        let payload = serde_json::to_vec(envelope)?;
        self.client
            .publish(&topic, QoS::AtLeastOnce, false, payload)
            .await?;
        tracing::info!(topic = %topic, envelope = ?envelope, "command dispatched");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::MqttOptions;

    fn measure() -> CommandEnvelope {
        CommandEnvelope::Measure {
            count: 10,
            interval: 1.0,
            base: 25.0,
            variance: 5.0,
        }
    }

    #[test]
    fn command_topic_targets_sensor_or_broadcast() {
        assert_eq!(command_topic("temperature"), "commands/temperature");
        assert_eq!(command_topic(BROADCAST_TARGET), "commands/all");
    }

    #[test]
    fn measure_envelope_wire_shape() {
        let encoded = serde_json::to_string(&measure()).unwrap();
        assert_eq!(
            encoded,
            r#"{"command":"measure","count":10,"interval":1.0,"base":25.0,"variance":5.0}"#
        );
    }

    #[test]
    fn stop_envelope_carries_no_parameters() {
        let encoded = serde_json::to_string(&CommandEnvelope::Stop).unwrap();
        assert_eq!(encoded, r#"{"command":"stop"}"#);
    }

    #[test]
    fn validate_rejects_bad_measure_parameters() {
        let zero_count = CommandEnvelope::Measure {
            count: 0,
            interval: 1.0,
            base: 25.0,
            variance: 5.0,
        };
        assert!(zero_count.validate().is_err());

        let negative_interval = CommandEnvelope::Measure {
            count: 3,
            interval: -0.5,
            base: 25.0,
            variance: 5.0,
        };
        assert!(negative_interval.validate().is_err());

        let negative_variance = CommandEnvelope::Measure {
            count: 3,
            interval: 1.0,
            base: 25.0,
            variance: -1.0,
        };
        assert!(negative_variance.validate().is_err());

        assert!(measure().validate().is_ok());
        assert!(CommandEnvelope::Stop.validate().is_ok());
    }

    #[tokio::test]
    async fn dispatch_fails_without_connection() {
        let options = MqttOptions::new("sensorctl-test", "localhost", 1883);
        let (client, _eventloop) = AsyncClient::new(options, 8);
        let dispatcher = Dispatcher::new(client, Arc::new(AtomicBool::new(false)));
        let err = dispatcher
            .dispatch("temperature", &measure())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotConnected));
    }
}
