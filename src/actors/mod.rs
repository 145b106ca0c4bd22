//! Actor-based telemetry pipeline
//!
//! Each unit runs as an independent tokio task and is driven through a
//! typed handle wrapping its command channel.
//!
//! ## Architecture Overview
//!
//! ```text
//!   SensorArray ──► SchedulerActor ──publish──► RelayActor
//!                                                  │ try_send per subscriber
//!                                    ┌─────────────┴─────────────┐
//!                                    ▼                           ▼
//!                             RecorderActor              CoordinatorActor
//!                                    │                           │ evaluate
//!                                    ▼                           ▼
//!                              ReadingStore              DispatcherActor
//!                                                    (email, SMS, chat)
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: each actor has an mpsc command channel for control messages
//! 2. **Events**: readings are fanned out by the relay to per-subscriber queues
//! 3. **Request/Response**: oneshot channels for queries
//! 4. **Current handles**: units look up their peers through [`CurrentHandle`]
//!    cells at call time, so a restarted peer is picked up automatically

pub mod coordinator;
pub mod dispatcher;
pub mod messages;
pub mod recorder;
pub mod relay;
pub mod scheduler;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Task running one pipeline unit
pub type UnitTask = JoinHandle<anyhow::Result<()>>;

/// Read side of a [`HandleCell`]
#[derive(Clone)]
pub struct CurrentHandle<H> {
    rx: watch::Receiver<Option<H>>,
}

impl<H: Clone> CurrentHandle<H> {
    /// A handle that never changes
    pub fn fixed(handle: H) -> Self {
        let (_tx, rx) = watch::channel(Some(handle));
        Self { rx }
    }

    /// A cell that never holds a handle
    pub fn empty() -> Self {
        let (_tx, rx) = watch::channel(None);
        Self { rx }
    }

    /// The handle currently published, if the unit is running
    pub fn get(&self) -> Option<H> {
        self.rx.borrow().clone()
    }
}

/// Publishes the handle of the latest incarnation of a unit
pub struct HandleCell<H> {
    tx: watch::Sender<Option<H>>,
}

impl<H: Clone> HandleCell<H> {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn publish(&self, handle: H) {
        self.tx.send_replace(Some(handle));
    }

    /// Withdraw the handle, returning the previous one
    pub fn clear(&self) -> Option<H> {
        self.tx.send_replace(None)
    }

    pub fn current(&self) -> Option<H> {
        self.tx.borrow().clone()
    }

    pub fn reader(&self) -> CurrentHandle<H> {
        CurrentHandle {
            rx: self.tx.subscribe(),
        }
    }
}

impl<H: Clone> Default for HandleCell<H> {
    fn default() -> Self {
        Self::new()
    }
}
