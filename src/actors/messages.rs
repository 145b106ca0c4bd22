//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: request/response messages sent to one actor via mpsc
//! 2. **Events**: [`ReadingEvent`]s fanned out by the relay; cloned per subscriber
//! 3. **Outcomes**: every cycle and delivery reports what happened as data

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

use crate::Reading;
use crate::notification::{Audience, DispatchReport, Message};

/// Event published when a new reading has been measured
#[derive(Debug, Clone)]
pub struct ReadingEvent {
    /// Name of the producing scheduler
    pub producer: String,

    pub reading: Reading,

    /// When the event was handed to the relay
    pub published_at: DateTime<Utc>,
}

impl ReadingEvent {
    pub fn new(producer: impl Into<String>, reading: Reading) -> Self {
        Self {
            producer: producer.into(),
            reading,
            published_at: Utc::now(),
        }
    }
}

pub type SubscriberId = String;

/// Registration of a consumer with the relay
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub id: SubscriberId,
    pub sender: mpsc::Sender<ReadingEvent>,
}

impl Subscriber {
    /// Create a subscriber together with the receiving end of its queue
    pub fn channel(
        id: impl Into<SubscriberId>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<ReadingEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                id: id.into(),
                sender,
            },
            receiver,
        )
    }
}

/// Commands that can be sent to the RelayActor
#[derive(Debug)]
pub enum RelayCommand {
    Subscribe {
        subscriber: Subscriber,
        respond_to: oneshot::Sender<SubscribeOutcome>,
    },

    /// Remove a subscriber; responds `false` if it was not subscribed
    Unsubscribe {
        id: SubscriberId,
        respond_to: oneshot::Sender<bool>,
    },

    Publish {
        event: ReadingEvent,
        respond_to: oneshot::Sender<PublishOutcome>,
    },

    GetStats {
        respond_to: oneshot::Sender<RelayStats>,
    },

    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Added,

    /// Same id and same queue, nothing changed
    AlreadySubscribed,

    /// Same id with a new queue; the old queue was dropped
    Replaced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered {
        /// Subscribers the event was queued for
        subscribers: usize,

        /// Subscribers whose queue was full
        dropped: usize,

        /// Subscribers removed because their receiver was gone
        removed: usize,
    },

    /// Timestamp not newer than the last reading of the same producer
    Stale { last_timestamp: i64 },
}

/// Relay counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub subscribers: usize,
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub stale: u64,
    pub removed: u64,
}

/// Commands that can be sent to the SchedulerActor
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Measure and publish immediately, outside the periodic schedule
    MeasureNow {
        respond_to: oneshot::Sender<Result<Reading>>,
    },

    /// Change the interval; the next tick is re-armed from the last tick
    UpdateInterval { interval: Duration },

    GetStatus {
        respond_to: oneshot::Sender<SchedulerStatus>,
    },

    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerStatus {
    pub interval: Duration,
    pub measurements: u64,
    pub failures: u64,
    pub timer_armed: bool,
}

/// Commands that can be sent to the CoordinatorActor
#[derive(Debug)]
pub enum CoordinatorCommand {
    GetStatus {
        respond_to: oneshot::Sender<CoordinatorStatus>,
    },

    /// Keep evaluating but stop dispatching, optionally for a limited time
    Mute { duration: Option<Duration> },

    Unmute,

    Shutdown,
}

/// Lifecycle of the notification coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Starting,

    /// Waiting for the first reading, whose alerts are suppressed
    Priming,

    Armed,

    /// Terminal: the coordinator task has exited
    Stopped,
}

/// What the coordinator did with one reading
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Tolerances or recipients could not be fetched
    Aborted(String),

    /// No tolerances configured
    NothingToCheck,

    AllClear,

    /// Alerts found on the first reading and not sent
    Suppressed { alerts: usize },

    /// Alerts found while muted
    Muted { alerts: usize },

    Dispatched(DispatchReport),

    /// Alerts found but no dispatcher was reachable
    NoDispatcher { alerts: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorStatus {
    pub state: CoordinatorState,
    pub muted: bool,

    /// Readings received since start
    pub processed: u64,

    pub last_outcome: Option<CycleOutcome>,
}

/// Commands that can be sent to the DispatcherActor
#[derive(Debug)]
pub enum DispatcherCommand {
    Dispatch {
        message: Message,
        audience: Audience,
        respond_to: oneshot::Sender<DispatchReport>,
    },

    Shutdown,
}

/// Commands that can be sent to the RecorderActor
#[derive(Debug)]
pub enum RecorderCommand {
    /// Write buffered readings now
    Flush {
        respond_to: oneshot::Sender<RecorderStats>,
    },

    GetStats {
        respond_to: oneshot::Sender<RecorderStats>,
    },

    Shutdown,
}

/// Recorder statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecorderStats {
    pub received: u64,
    pub stored: u64,
    pub failed: u64,

    /// Readings waiting in the write buffer
    pub pending: usize,

    pub flush_count: u64,
    pub last_cleanup: Option<DateTime<Utc>>,
    pub deleted: u64,
}
