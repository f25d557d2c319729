use crate::pipeline::{IngestStats, WriterHandle};
use crate::store::NewReading;
use crate::telemetry::{self, RejectReason};
use anyhow::Result;
use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Turns inbound bus messages into durable rows. Validation failures are
/// counted and logged but never halt the stream; the bus's at-least-once
/// delivery is accepted as-is, so a redelivered payload becomes another row.
#[derive(Clone)]
pub struct TelemetryIngestor {
    writer: WriterHandle,
}

impl TelemetryIngestor {
    pub fn new(writer: WriterHandle) -> Self {
        Self { writer }
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        self.writer.stats()
    }

    pub async fn flush(&self) -> Result<()> {
        self.writer.flush().await
    }

    pub async fn handle_message(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let received_at = Utc::now();
        let received_secs = received_at.timestamp_micros() as f64 / 1_000_000.0;

        // simd-json parses in place; keep the original bytes for diagnostics.
        let mut scratch = payload.clone();
        match telemetry::parse_payload(&mut scratch, received_secs) {
            Ok(accepted) => {
                self.writer
                    .enqueue(NewReading {
                        topic: topic.to_string(),
                        system_timestamp: received_at,
                        measurement_time: accepted.measurement_time,
                        value: accepted.value,
                    })
                    .await?;
            }
            Err(reason) => {
                let stats = self.stats();
                match reason {
                    RejectReason::Malformed(_) => {
                        stats.rejected_parse.fetch_add(1, Ordering::Relaxed);
                    }
                    RejectReason::MissingValue => {
                        stats.rejected_missing_value.fetch_add(1, Ordering::Relaxed);
                    }
                }
                tracing::warn!(
                    error = %reason,
                    topic = %topic,
                    payload = %String::from_utf8_lossy(&payload),
                    "rejected telemetry payload"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{spawn_writer, IngestStats, WriterHandle};
    use crate::store::ReadingsStore;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    struct Fixture {
        _dir: TempDir,
        store: ReadingsStore,
        ingestor: TelemetryIngestor,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = ReadingsStore::open(&dir.path().join("readings.db"))
            .await
            .unwrap();
        let stats = Arc::new(IngestStats::new());
        let (tx, rx) = mpsc::channel(64);
        let writer = WriterHandle::new(tx, stats.clone());
        let _writer = spawn_writer(store.clone(), rx, stats);
        Fixture {
            _dir: dir,
            store,
            ingestor: TelemetryIngestor::new(writer),
        }
    }

    #[tokio::test]
    async fn accepted_payload_round_trips_into_a_row() {
        let f = fixture().await;
        let payload =
            br#"{"timestamp":1700000000.5,"value":25.0,"sensor_type":"temperature"}"#.to_vec();
        f.ingestor
            .handle_message("sensors/temperature", payload)
            .await
            .unwrap();
        f.ingestor.flush().await.unwrap();

        let rows = f.store.recent(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].topic, "sensors/temperature");
        assert_eq!(rows[0].value, 25.0);
        assert_eq!(rows[0].measurement_time, 1700000000.5);
        assert_eq!(f.ingestor.stats().accepted.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn missing_value_leaves_the_store_unchanged() {
        let f = fixture().await;
        let payload = br#"{"timestamp":1700000000.5,"sensor_type":"temperature"}"#.to_vec();
        f.ingestor
            .handle_message("sensors/temperature", payload)
            .await
            .unwrap();
        f.ingestor.flush().await.unwrap();

        assert_eq!(f.store.count().await.unwrap(), 0);
        let stats = f.ingestor.stats();
        assert_eq!(stats.rejected_missing_value.load(Ordering::Relaxed), 1);
        assert_eq!(stats.accepted.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn malformed_payload_is_counted_not_fatal() {
        let f = fixture().await;
        f.ingestor
            .handle_message("sensors/temperature", b"{{nope".to_vec())
            .await
            .unwrap();
        // The stream keeps going: a valid payload after garbage still lands.
        f.ingestor
            .handle_message("sensors/temperature", br#"{"value":21.5}"#.to_vec())
            .await
            .unwrap();
        f.ingestor.flush().await.unwrap();

        assert_eq!(f.store.count().await.unwrap(), 1);
        assert_eq!(
            f.ingestor.stats().rejected_parse.load(Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn missing_timestamp_uses_receipt_time() {
        let f = fixture().await;
        let before = Utc::now().timestamp_micros() as f64 / 1_000_000.0;
        f.ingestor
            .handle_message("sensors/pressure", br#"{"value":101.3}"#.to_vec())
            .await
            .unwrap();
        f.ingestor.flush().await.unwrap();
        let after = Utc::now().timestamp_micros() as f64 / 1_000_000.0;

        let rows = f.store.recent(1).await.unwrap();
        assert!(rows[0].measurement_time >= before && rows[0].measurement_time <= after);
    }

    #[tokio::test]
    async fn redelivered_payload_becomes_a_second_row() {
        let f = fixture().await;
        let payload = br#"{"timestamp":1700000000.5,"value":25.0}"#.to_vec();
        f.ingestor
            .handle_message("sensors/temperature", payload.clone())
            .await
            .unwrap();
        f.ingestor
            .handle_message("sensors/temperature", payload)
            .await
            .unwrap();
        f.ingestor.flush().await.unwrap();
        assert_eq!(f.store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn bounded_run_lands_every_reading() {
        // What an agent publishes for measure{count:3, base:25, variance:0}.
        let f = fixture().await;
        for i in 0..3 {
            let payload = format!(
                r#"{{"timestamp":{},"value":25.0,"sensor_type":"temperature"}}"#,
                1700000000.0 + i as f64
            );
            f.ingestor
                .handle_message("sensors/temperature", payload.into_bytes())
                .await
                .unwrap();
        }
        f.ingestor.flush().await.unwrap();

        let rows = f.store.recent(10).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows
            .iter()
            .all(|r| r.topic == "sensors/temperature" && r.value == 25.0));
    }
}
