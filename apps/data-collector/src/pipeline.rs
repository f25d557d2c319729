use crate::store::{NewReading, ReadingsStore};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug)]
pub enum WriterCommand {
    Append(NewReading),
    Flush(oneshot::Sender<()>),
}

/// Handle for enqueueing accepted readings onto the single writer task.
/// The task is the mutual exclusion around the write path: appends are
/// applied strictly in arrival order.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<WriterCommand>,
    stats: Arc<IngestStats>,
}

impl WriterHandle {
    pub fn new(tx: mpsc::Sender<WriterCommand>, stats: Arc<IngestStats>) -> Self {
        Self { tx, stats }
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        self.stats.clone()
    }

    pub async fn enqueue(&self, reading: NewReading) -> Result<()> {
        let queue_depth = self.stats.queue_depth.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(queue_depth, topic = %reading.topic, "queued reading");
        if let Err(err) = self.tx.send(WriterCommand::Append(reading)).await {
            self.stats.queue_depth.fetch_sub(1, Ordering::Relaxed);
            return Err(err.into());
        }
        Ok(())
    }

    /// Write barrier: resolves once every previously enqueued reading has
    /// been applied to the store.
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let _ = self.tx.send(WriterCommand::Flush(tx)).await;
        let _ = rx.await;
        Ok(())
    }
}

#[derive(Debug)]
pub struct IngestStats {
    pub accepted: AtomicU64,
    pub rejected_parse: AtomicU64,
    pub rejected_missing_value: AtomicU64,
    pub store_errors: AtomicU64,
    pub queue_depth: AtomicU64,
    pub mqtt_connected: AtomicBool,
    pub last_error: Mutex<Option<String>>,
}

impl IngestStats {
    pub fn new() -> Self {
        Self {
            accepted: AtomicU64::new(0),
            rejected_parse: AtomicU64::new(0),
            rejected_missing_value: AtomicU64::new(0),
            store_errors: AtomicU64::new(0),
            queue_depth: AtomicU64::new(0),
            mqtt_connected: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    pub fn set_mqtt_connected(&self, connected: bool) {
        self.mqtt_connected.store(connected, Ordering::Relaxed);
    }

    pub fn record_error(&self, err: impl Into<String>) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = Some(err.into());
        }
    }
}

pub fn spawn_writer(
    store: ReadingsStore,
    mut rx: mpsc::Receiver<WriterCommand>,
    stats: Arc<IngestStats>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                WriterCommand::Append(reading) => {
                    stats.queue_depth.fetch_sub(1, Ordering::Relaxed);
                    match store.append(&reading).await {
                        Ok(id) => {
                            stats.accepted.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!(id, topic = %reading.topic, value = reading.value, "stored reading");
                        }
                        Err(err) => {
                            stats.store_errors.fetch_add(1, Ordering::Relaxed);
                            stats.record_error(err.to_string());
                            tracing::error!(error = %err, topic = %reading.topic, "failed to store reading");
                        }
                    }
                }
                WriterCommand::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
    })
}
