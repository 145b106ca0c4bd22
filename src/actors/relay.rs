//! RelayActor - Fans readings out to subscribers
//!
//! ## Message Flow
//!
//! ```text
//! Scheduler ──Publish──► RelayActor ──try_send──► [Coordinator, Recorder, ...]
//!                            ↑
//!                            └─── Commands (Subscribe, Unsubscribe, GetStats, Shutdown)
//! ```
//!
//! Delivery never blocks the relay: a subscriber whose queue is full misses
//! that event, and a subscriber whose receiver is gone is removed. Events
//! from one producer must carry strictly increasing timestamps; anything
//! else is dropped as stale.

use std::collections::HashMap;

use anyhow::{Context, Result};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, trace, warn};

use super::UnitTask;
use super::messages::{
    PublishOutcome, ReadingEvent, RelayCommand, RelayStats, SubscribeOutcome, Subscriber,
    SubscriberId,
};

pub struct RelayActor {
    command_rx: mpsc::Receiver<RelayCommand>,

    subscribers: HashMap<SubscriberId, mpsc::Sender<ReadingEvent>>,

    /// Last accepted timestamp per producer
    last_timestamp: HashMap<String, i64>,

    stats: RelayStats,
}

impl RelayActor {
    pub fn new(command_rx: mpsc::Receiver<RelayCommand>) -> Self {
        Self {
            command_rx,
            subscribers: HashMap::new(),
            last_timestamp: HashMap::new(),
            stats: RelayStats::default(),
        }
    }

    /// Run until Shutdown or until every handle is dropped
    #[instrument(skip(self))]
    pub async fn run(mut self) -> Result<()> {
        debug!("starting stats relay");

        while let Some(cmd) = self.command_rx.recv().await {
            match cmd {
                RelayCommand::Subscribe {
                    subscriber,
                    respond_to,
                } => {
                    let outcome = self.subscribe(subscriber);
                    let _ = respond_to.send(outcome);
                }

                RelayCommand::Unsubscribe { id, respond_to } => {
                    let removed = self.subscribers.remove(&id).is_some();
                    if removed {
                        info!(subscriber = %id, "subscriber removed");
                    }
                    let _ = respond_to.send(removed);
                }

                RelayCommand::Publish { event, respond_to } => {
                    let outcome = self.publish(event);
                    let _ = respond_to.send(outcome);
                }

                RelayCommand::GetStats { respond_to } => {
                    let mut stats = self.stats.clone();
                    stats.subscribers = self.subscribers.len();
                    let _ = respond_to.send(stats);
                }

                RelayCommand::Shutdown => {
                    debug!("received shutdown command");
                    break;
                }
            }
        }

        // dropping the senders closes every subscriber queue
        self.subscribers.clear();
        debug!("stats relay stopped");
        Ok(())
    }

    fn subscribe(&mut self, subscriber: Subscriber) -> SubscribeOutcome {
        let Subscriber { id, sender } = subscriber;

        let outcome = match self.subscribers.get(&id) {
            Some(existing) if existing.same_channel(&sender) => {
                return SubscribeOutcome::AlreadySubscribed;
            }
            Some(_) => SubscribeOutcome::Replaced,
            None => SubscribeOutcome::Added,
        };

        info!(subscriber = %id, ?outcome, "subscriber registered");
        self.subscribers.insert(id, sender);
        outcome
    }

    fn publish(&mut self, event: ReadingEvent) -> PublishOutcome {
        let timestamp = event.reading.timestamp;

        if let Some(&last) = self.last_timestamp.get(&event.producer)
            && timestamp <= last
        {
            warn!(
                producer = %event.producer,
                "dropping stale reading at {timestamp}, last accepted was {last}"
            );
            self.stats.stale += 1;
            return PublishOutcome::Stale {
                last_timestamp: last,
            };
        }

        self.last_timestamp.insert(event.producer.clone(), timestamp);
        self.stats.published += 1;

        let mut delivered = 0;
        let mut dropped = 0;
        let mut closed = Vec::new();

        for (id, sender) in &self.subscribers {
            match sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber = %id, "subscriber queue full, reading at {timestamp} dropped");
                    dropped += 1;
                }
                Err(TrySendError::Closed(_)) => closed.push(id.clone()),
            }
        }

        for id in &closed {
            self.subscribers.remove(id);
            info!(subscriber = %id, "subscriber went away, removed");
        }

        self.stats.delivered += delivered as u64;
        self.stats.dropped += dropped as u64;
        self.stats.removed += closed.len() as u64;

        trace!("published reading at {timestamp} to {delivered} subscribers");

        PublishOutcome::Delivered {
            subscribers: delivered,
            dropped,
            removed: closed.len(),
        }
    }
}

/// Handle for controlling a RelayActor
#[derive(Clone)]
pub struct RelayHandle {
    sender: mpsc::Sender<RelayCommand>,
}

impl RelayHandle {
    pub fn spawn() -> (Self, UnitTask) {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let actor = RelayActor::new(cmd_rx);
        let task = tokio::spawn(actor.run());

        (Self { sender: cmd_tx }, task)
    }

    pub async fn subscribe(&self, subscriber: Subscriber) -> Result<SubscribeOutcome> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RelayCommand::Subscribe {
                subscriber,
                respond_to: tx,
            })
            .await
            .context("failed to send Subscribe command")?;

        rx.await.context("failed to receive response")
    }

    /// Returns `false` if the id was not subscribed
    pub async fn unsubscribe(&self, id: &str) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RelayCommand::Unsubscribe {
                id: id.to_string(),
                respond_to: tx,
            })
            .await
            .context("failed to send Unsubscribe command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn publish(&self, event: ReadingEvent) -> Result<PublishOutcome> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RelayCommand::Publish {
                event,
                respond_to: tx,
            })
            .await
            .context("failed to send Publish command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn stats(&self) -> Result<RelayStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RelayCommand::GetStats { respond_to: tx })
            .await
            .context("failed to send GetStats command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(RelayCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }

    /// Whether the actor behind this handle has stopped
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
