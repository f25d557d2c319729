use crate::command::{CommandEnvelope, MeasureParams};
use crate::mqtt::{AgentEvent, BusError};
use crate::telemetry::{sample_value, unix_now, SensorIdentity, TelemetryRecord};
use std::future::Future;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

/// Narrow seam between the measurement loop and the bus, so the loop's
/// run semantics can be exercised without a broker.
pub trait TelemetrySink {
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), BusError>> + Send;
}

/// Why the agent's event loop ended.
#[derive(Debug, PartialEq, Eq)]
pub enum AgentExit {
    /// The bus poller reported a broker disconnect; any in-flight run was
    /// abandoned and is not resumed on reconnect.
    ConnectionLost,
    /// The event channel closed (poller gone or shutdown).
    ChannelClosed,
}

#[derive(Debug, PartialEq)]
enum RunExit {
    Completed,
    Stopped,
    Superseded(MeasureParams),
    Aborted,
    Disconnected,
}

pub struct Agent<S> {
    identity: SensorIdentity,
    sink: S,
    generation: u64,
}

impl<S: TelemetrySink> Agent<S> {
    pub fn new(identity: SensorIdentity, sink: S) -> Self {
        Self {
            identity,
            sink,
            generation: 0,
        }
    }

    /// Idle loop: waits for commands and drives measurement runs until the
    /// connection or the event channel goes away.
    pub async fn run(&mut self, events: &mut mpsc::Receiver<AgentEvent>) -> AgentExit {
        loop {
            let Some(event) = events.recv().await else {
                return AgentExit::ChannelClosed;
            };
            let mut params = match event {
                AgentEvent::ConnectionLost => return AgentExit::ConnectionLost,
                AgentEvent::Command(CommandEnvelope::Stop) => {
                    tracing::debug!("stop received while idle; nothing to cancel");
                    continue;
                }
                AgentEvent::Command(envelope) => match envelope.measure_params() {
                    Some(params) => params,
                    None => continue,
                },
            };

            // A superseding measure cancels the current run and starts the
            // next one immediately; commands are never queued.
            loop {
                match self.run_measurement(params, events).await {
                    RunExit::Superseded(next) => params = next,
                    RunExit::Completed | RunExit::Stopped | RunExit::Aborted => break,
                    RunExit::Disconnected => return AgentExit::ConnectionLost,
                }
            }
        }
    }

    async fn run_measurement(
        &mut self,
        params: MeasureParams,
        events: &mut mpsc::Receiver<AgentEvent>,
    ) -> RunExit {
        self.generation += 1;
        let run = self.generation;
        let topic = self.identity.telemetry_topic();
        let mut remaining = params.count;
        tracing::info!(
            run,
            count = params.count,
            interval = ?params.interval,
            base = params.base,
            variance = params.variance,
            "starting measurement run"
        );

        while remaining > 0 {
            // Commands that arrived during the previous sleep, or during a
            // zero-interval burst, take effect before the next publish.
            loop {
                match events.try_recv() {
                    Ok(AgentEvent::Command(CommandEnvelope::Stop)) => {
                        tracing::info!(run, remaining, "measurement run stopped");
                        return RunExit::Stopped;
                    }
                    Ok(AgentEvent::Command(envelope)) => {
                        if let Some(next) = envelope.measure_params() {
                            tracing::info!(run, remaining, "measurement run superseded");
                            return RunExit::Superseded(next);
                        }
                    }
                    Ok(AgentEvent::ConnectionLost) => return RunExit::Disconnected,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return RunExit::Disconnected,
                }
            }

            let record = TelemetryRecord {
                timestamp: unix_now(),
                value: sample_value(params.base, params.variance, &mut rand::thread_rng()),
                sensor_type: self.identity.sensor_type.clone(),
            };
            let payload = match serde_json::to_vec(&record) {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::error!(run, error = %err, "could not encode reading; aborting run");
                    return RunExit::Aborted;
                }
            };
            if let Err(err) = self.sink.publish(&topic, payload).await {
                tracing::warn!(run, error = %err, "telemetry publish failed; aborting run");
                return RunExit::Aborted;
            }
            remaining -= 1;
            tracing::debug!(run, topic = %topic, value = record.value, remaining, "published reading");

            if remaining == 0 {
                break;
            }

            // Interruptible sleep: a stop or superseding measure arriving
            // mid-interval cancels before the next publish, not after.
            tokio::select! {
                _ = tokio::time::sleep(params.interval) => {}
                maybe = events.recv() => match maybe {
                    Some(AgentEvent::Command(CommandEnvelope::Stop)) => {
                        tracing::info!(run, remaining, "measurement run stopped");
                        return RunExit::Stopped;
                    }
                    Some(AgentEvent::Command(envelope)) => {
                        if let Some(next) = envelope.measure_params() {
                            tracing::info!(run, remaining, "measurement run superseded");
                            return RunExit::Superseded(next);
                        }
                    }
                    Some(AgentEvent::ConnectionLost) | None => return RunExit::Disconnected,
                },
            }
        }

        tracing::info!(run, count = params.count, "measurement run complete");
        RunExit::Completed
    }
}
