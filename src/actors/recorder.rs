//! RecorderActor - Persists readings published on the relay
//!
//! ## Batching Strategy
//!
//! Readings are buffered and written with [`ReadingStore::append_batch`]:
//! - **Size trigger**: flush once `batch_size` readings are waiting
//! - **Time trigger**: flush every `flush_interval`
//!
//! Buffered readings are flushed on shutdown. A failed write keeps the
//! batch for the next flush, up to [`MAX_PENDING`] readings.
//!
//! ## Retention
//!
//! With a retention policy the recorder periodically deletes readings older
//! than the retention window.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::StorageConfig;
use crate::storage::{ReadingRow, ReadingStore};

use super::messages::{ReadingEvent, RecorderCommand, RecorderStats, Subscriber};
use super::relay::RelayHandle;
use super::{CurrentHandle, UnitTask};

/// Readings kept across failed writes before the oldest are discarded
pub const MAX_PENDING: usize = 1000;

/// Age-based cleanup of stored readings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub max_age: Duration,
    pub cleanup_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct RecorderSettings {
    pub subscriber_id: String,
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub retention: Option<Retention>,
}

impl RecorderSettings {
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            retention: config
                .retention()
                .map(|(max_age, cleanup_interval)| Retention {
                    max_age,
                    cleanup_interval,
                }),
            ..Self::default()
        }
    }
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            subscriber_id: "reading-recorder".to_string(),
            queue_capacity: 64,
            batch_size: 10,
            flush_interval: Duration::from_secs(5),
            retention: None,
        }
    }
}

pub struct RecorderActor {
    settings: RecorderSettings,
    relay: CurrentHandle<RelayHandle>,
    store: Arc<dyn ReadingStore>,
    command_rx: mpsc::Receiver<RecorderCommand>,

    /// Rows waiting to be written
    pending: Vec<ReadingRow>,

    stats: RecorderStats,
}

impl RecorderActor {
    pub fn new(
        settings: RecorderSettings,
        relay: CurrentHandle<RelayHandle>,
        store: Arc<dyn ReadingStore>,
        command_rx: mpsc::Receiver<RecorderCommand>,
    ) -> Self {
        if let Some(retention) = &settings.retention {
            debug!(
                "retention cleanup enabled: keep {:?}, check every {:?}",
                retention.max_age, retention.cleanup_interval
            );
        }

        Self {
            pending: Vec::with_capacity(settings.batch_size),
            settings,
            relay,
            store,
            command_rx,
            stats: RecorderStats::default(),
        }
    }

    #[instrument(skip(self), fields(subscriber = %self.settings.subscriber_id))]
    pub async fn run(mut self) -> Result<()> {
        debug!("starting reading recorder");

        let relay = self.relay.get().context("stats relay unavailable")?;
        let (subscriber, mut readings) = Subscriber::channel(
            self.settings.subscriber_id.clone(),
            self.settings.queue_capacity,
        );
        relay
            .subscribe(subscriber)
            .await
            .context("failed to subscribe to stats relay")?;

        let mut flush_timer = time::interval(self.settings.flush_interval.max(Duration::from_millis(10)));
        flush_timer.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        let retention = self.settings.retention;
        let mut cleanup_timer = time::interval(
            retention
                .map(|r| r.cleanup_interval)
                .unwrap_or(Duration::from_secs(3600))
                .max(Duration::from_secs(1)),
        );

        let result = loop {
            tokio::select! {
                event = readings.recv() => match event {
                    Some(event) => self.buffer(event).await,
                    None => break Err(anyhow!("stats relay closed the subscription")),
                },

                _ = flush_timer.tick() => {
                    if !self.pending.is_empty() {
                        trace!("time trigger: flushing {} readings", self.pending.len());
                        self.flush().await;
                    }
                }

                _ = cleanup_timer.tick(), if retention.is_some() => {
                    if let Some(retention) = retention {
                        self.cleanup(retention).await;
                    }
                }

                cmd = self.command_rx.recv() => match cmd {
                    Some(RecorderCommand::Flush { respond_to }) => {
                        while let Ok(event) = readings.try_recv() {
                            self.push(event);
                        }
                        self.flush().await;
                        let _ = respond_to.send(self.stats());
                    }

                    Some(RecorderCommand::GetStats { respond_to }) => {
                        let _ = respond_to.send(self.stats());
                    }

                    Some(RecorderCommand::Shutdown) => {
                        debug!("received shutdown command");
                        break Ok(());
                    }

                    None => {
                        warn!("command channel closed, shutting down");
                        break Ok(());
                    }
                }
            }
        };

        if let Some(relay) = self.relay.get()
            && let Err(e) = relay.unsubscribe(&self.settings.subscriber_id).await
        {
            debug!("could not unsubscribe: {e:#}");
        }

        // keep whatever was already queued
        readings.close();
        while let Ok(event) = readings.try_recv() {
            self.push(event);
        }
        drop(readings);

        if !self.pending.is_empty() {
            info!("flushing {} readings before shutdown", self.pending.len());
            self.flush().await;
        }

        debug!("reading recorder stopped");
        result
    }

    fn push(&mut self, event: ReadingEvent) {
        self.stats.received += 1;
        self.pending.push(ReadingRow::new(event.producer, event.reading));
    }

    async fn buffer(&mut self, event: ReadingEvent) {
        self.push(event);

        if self.pending.len() >= self.settings.batch_size {
            trace!("size trigger: flushing {} readings", self.pending.len());
            self.flush().await;
        }
    }

    async fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let batch = std::mem::take(&mut self.pending);
        let count = batch.len();

        match self.store.append_batch(batch.clone()).await {
            Ok(()) => {
                debug!("stored {count} readings");
                self.stats.stored += count as u64;
                self.stats.flush_count += 1;
            }
            Err(e) => {
                error!("failed to store {count} readings: {e}");
                self.stats.failed += 1;
                self.pending = batch;

                if self.pending.len() > MAX_PENDING {
                    let excess = self.pending.len() - MAX_PENDING;
                    warn!("discarding {excess} oldest unsaved readings");
                    self.pending.drain(..excess);
                }
            }
        }
    }

    async fn cleanup(&mut self, retention: Retention) {
        let max_age = i64::try_from(retention.max_age.as_secs()).unwrap_or(i64::MAX);
        let cutoff = Utc::now().timestamp().saturating_sub(max_age);

        match self.store.cleanup_before(cutoff).await {
            Ok(deleted) => {
                if deleted > 0 {
                    info!("retention cleanup removed {deleted} readings");
                }
                self.stats.deleted += deleted as u64;
                self.stats.last_cleanup = Some(Utc::now());
            }
            Err(e) => error!("retention cleanup failed: {e}"),
        }
    }

    fn stats(&self) -> RecorderStats {
        RecorderStats {
            pending: self.pending.len(),
            ..self.stats.clone()
        }
    }
}

/// Handle for controlling a RecorderActor
#[derive(Clone)]
pub struct RecorderHandle {
    sender: mpsc::Sender<RecorderCommand>,
}

impl RecorderHandle {
    pub fn spawn(
        settings: RecorderSettings,
        relay: CurrentHandle<RelayHandle>,
        store: Arc<dyn ReadingStore>,
    ) -> (Self, UnitTask) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor = RecorderActor::new(settings, relay, store, cmd_rx);
        let task = tokio::spawn(actor.run());

        (Self { sender: cmd_tx }, task)
    }

    /// Write buffered readings now
    pub async fn flush(&self) -> Result<RecorderStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RecorderCommand::Flush { respond_to: tx })
            .await
            .context("failed to send Flush command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn stats(&self) -> Result<RecorderStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RecorderCommand::GetStats { respond_to: tx })
            .await
            .context("failed to send GetStats command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(RecorderCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
