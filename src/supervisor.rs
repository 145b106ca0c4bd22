//! Supervisor - Starts, watches and stops the pipeline units
//!
//! ## Lifecycle
//!
//! ```text
//! start:  Relay → Dispatcher → Recorder → Coordinator → Scheduler
//! check:  reap finished units, run the failure hook, start a fresh one
//! stop:   Coordinator → Recorder → Scheduler → Dispatcher → Relay
//! ```
//!
//! Every unit publishes its handle in a [`HandleCell`]. Peers read the cell
//! when they need the unit, so a restarted relay or dispatcher is picked up
//! without restarting its callers.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinError;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::actors::coordinator::{CoordinatorHandle, CoordinatorSettings};
use crate::actors::dispatcher::{DispatcherHandle, DispatcherSettings, Transports};
use crate::actors::recorder::{RecorderHandle, RecorderSettings};
use crate::actors::relay::RelayHandle;
use crate::actors::scheduler::{SchedulerHandle, SchedulerSettings};
use crate::actors::{HandleCell, UnitTask};
use crate::config::Config;
use crate::sensors::SharedSource;
use crate::storage::StorageBundle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UnitKind {
    Relay,
    Dispatcher,
    Recorder,
    Coordinator,
    Scheduler,
}

impl UnitKind {
    pub const START_ORDER: [UnitKind; 5] = [
        UnitKind::Relay,
        UnitKind::Dispatcher,
        UnitKind::Recorder,
        UnitKind::Coordinator,
        UnitKind::Scheduler,
    ];

    pub const STOP_ORDER: [UnitKind; 5] = [
        UnitKind::Coordinator,
        UnitKind::Recorder,
        UnitKind::Scheduler,
        UnitKind::Dispatcher,
        UnitKind::Relay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Relay => "stats-relay",
            UnitKind::Dispatcher => "alert-dispatcher",
            UnitKind::Recorder => "reading-recorder",
            UnitKind::Coordinator => "notification-coordinator",
            UnitKind::Scheduler => "telemetry-scheduler",
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a unit's task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitExit {
    /// Returned `Ok` without being asked to stop
    Completed,
    Failed(String),
    Panicked(String),
    Cancelled,
}

impl UnitExit {
    fn from_join(result: Result<Result<()>, JoinError>) -> Self {
        match result {
            Ok(Ok(())) => UnitExit::Completed,
            Ok(Err(e)) => UnitExit::Failed(format!("{e:#}")),
            Err(e) if e.is_panic() => UnitExit::Panicked(panic_message(e.into_panic())),
            Err(_) => UnitExit::Cancelled,
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[derive(Default)]
struct UnitSlot {
    task: Option<UnitTask>,
    restarts: u32,
}

impl UnitSlot {
    fn install(&mut self, task: UnitTask) {
        if let Some(previous) = self.task.replace(task) {
            previous.abort();
        }
    }

    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn has_finished(&self) -> bool {
        self.task.as_ref().is_some_and(|task| task.is_finished())
    }
}

/// Shared resources handed to the units
#[derive(Clone)]
pub struct Collaborators {
    pub source: SharedSource,
    pub storage: StorageBundle,
    pub transports: Transports,
}

const MAX_CHECK_INTERVAL_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub scheduler: SchedulerSettings,
    pub dispatcher: DispatcherSettings,
    pub coordinator: CoordinatorSettings,
    pub recorder: RecorderSettings,

    /// How often finished units are detected and restarted
    pub check_interval: Duration,

    /// Time each unit gets to stop before it is aborted
    pub shutdown_timeout: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            scheduler: SchedulerSettings::from_config(&config.scheduler),
            dispatcher: DispatcherSettings::from_config(&config.notifications),
            coordinator: CoordinatorSettings::default(),
            recorder: RecorderSettings::from_config(&config.storage),
            check_interval: Duration::from_secs(
                config.supervisor.check_interval_secs.clamp(1, MAX_CHECK_INTERVAL_SECS),
            ),
            shutdown_timeout: Duration::from_secs(config.supervisor.shutdown_timeout_secs),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct Supervisor {
    collaborators: Collaborators,
    settings: PipelineSettings,

    relay: HandleCell<RelayHandle>,
    dispatcher: HandleCell<DispatcherHandle>,
    recorder: HandleCell<RecorderHandle>,
    coordinator: HandleCell<CoordinatorHandle>,
    scheduler: HandleCell<SchedulerHandle>,

    slots: HashMap<UnitKind, UnitSlot>,
}

impl Supervisor {
    pub fn new(collaborators: Collaborators, settings: PipelineSettings) -> Self {
        Self {
            collaborators,
            settings,
            relay: HandleCell::new(),
            dispatcher: HandleCell::new(),
            recorder: HandleCell::new(),
            coordinator: HandleCell::new(),
            scheduler: HandleCell::new(),
            slots: HashMap::new(),
        }
    }

    /// Start every unit in dependency order
    pub fn start(&mut self) {
        info!("starting pipeline");
        for kind in UnitKind::START_ORDER {
            self.start_unit(kind);
        }
    }

    fn start_unit(&mut self, kind: UnitKind) {
        let task = match kind {
            UnitKind::Relay => {
                let (handle, task) = RelayHandle::spawn();
                self.relay.publish(handle);
                task
            }

            UnitKind::Dispatcher => {
                let (handle, task) = DispatcherHandle::spawn(
                    self.settings.dispatcher.clone(),
                    self.collaborators.transports.clone(),
                );
                self.dispatcher.publish(handle);
                task
            }

            UnitKind::Recorder => {
                let (handle, task) = RecorderHandle::spawn(
                    self.settings.recorder.clone(),
                    self.relay.reader(),
                    self.collaborators.storage.readings.clone(),
                );
                self.recorder.publish(handle);
                task
            }

            UnitKind::Coordinator => {
                let (handle, task) = CoordinatorHandle::spawn(
                    self.settings.coordinator.clone(),
                    self.relay.reader(),
                    self.dispatcher.reader(),
                    self.collaborators.storage.tolerances.clone(),
                    self.collaborators.storage.recipients.clone(),
                );
                self.coordinator.publish(handle);
                task
            }

            UnitKind::Scheduler => {
                let (handle, task) = SchedulerHandle::spawn(
                    self.settings.scheduler.clone(),
                    self.collaborators.source.clone(),
                    self.relay.reader(),
                );
                self.scheduler.publish(handle);
                task
            }
        };

        debug!(unit = %kind, "unit started");
        self.slots.entry(kind).or_default().install(task);
    }

    /// Restart every unit whose task has ended
    ///
    /// Returns the units that were restarted and how they ended.
    #[instrument(skip(self))]
    pub async fn check_units(&mut self) -> Vec<(UnitKind, UnitExit)> {
        let mut exits = Vec::new();

        for kind in UnitKind::START_ORDER {
            let Some(exit) = self.reap(kind).await else {
                continue;
            };

            match &exit {
                UnitExit::Failed(reason) => error!(unit = %kind, "unit failed: {reason}"),
                UnitExit::Panicked(message) => error!(unit = %kind, "unit panicked: {message}"),
                UnitExit::Completed => warn!(unit = %kind, "unit exited unexpectedly"),
                UnitExit::Cancelled => warn!(unit = %kind, "unit was cancelled"),
            }

            self.on_unit_exit(kind).await;
            self.start_unit(kind);

            if let Some(slot) = self.slots.get_mut(&kind) {
                slot.restarts += 1;
                info!(unit = %kind, "unit restarted ({} restarts)", slot.restarts);
            }

            exits.push((kind, exit));
        }

        exits
    }

    async fn reap(&mut self, kind: UnitKind) -> Option<UnitExit> {
        let slot = self.slots.get_mut(&kind)?;
        if !slot.has_finished() {
            return None;
        }

        let task = slot.task.take()?;
        Some(UnitExit::from_join(task.await))
    }

    /// Failure hook: withdraw the dead handle and drop its relay subscription
    async fn on_unit_exit(&self, kind: UnitKind) {
        self.clear_handle(kind);

        let subscriber = match kind {
            UnitKind::Coordinator => Some(&self.settings.coordinator.subscriber_id),
            UnitKind::Recorder => Some(&self.settings.recorder.subscriber_id),
            _ => None,
        };

        if let Some(id) = subscriber
            && let Some(relay) = self.relay.current()
        {
            match relay.unsubscribe(id).await {
                Ok(true) => debug!(unit = %kind, "removed stale subscription"),
                Ok(false) => {}
                Err(e) => debug!(unit = %kind, "could not remove subscription: {e:#}"),
            }
        }
    }

    fn clear_handle(&self, kind: UnitKind) {
        match kind {
            UnitKind::Relay => drop(self.relay.clear()),
            UnitKind::Dispatcher => drop(self.dispatcher.clear()),
            UnitKind::Recorder => drop(self.recorder.clear()),
            UnitKind::Coordinator => drop(self.coordinator.clear()),
            UnitKind::Scheduler => drop(self.scheduler.clear()),
        }
    }

    async fn request_shutdown(&self, kind: UnitKind) -> Result<()> {
        match kind {
            UnitKind::Relay => match self.relay.current() {
                Some(handle) => handle.shutdown().await,
                None => Ok(()),
            },
            UnitKind::Dispatcher => match self.dispatcher.current() {
                Some(handle) => handle.shutdown().await,
                None => Ok(()),
            },
            UnitKind::Recorder => match self.recorder.current() {
                Some(handle) => handle.shutdown().await,
                None => Ok(()),
            },
            UnitKind::Coordinator => match self.coordinator.current() {
                Some(handle) => handle.shutdown().await,
                None => Ok(()),
            },
            UnitKind::Scheduler => match self.scheduler.current() {
                Some(handle) => handle.shutdown().await,
                None => Ok(()),
            },
        }
    }

    /// Stop every unit in reverse dependency order
    pub async fn stop(&mut self) {
        info!("stopping pipeline");
        let timeout = self.settings.shutdown_timeout;

        for kind in UnitKind::STOP_ORDER {
            match time::timeout(timeout, self.request_shutdown(kind)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(unit = %kind, "shutdown request not delivered: {e:#}"),
                Err(_) => warn!(unit = %kind, "shutdown request timed out"),
            }

            let task = self.slots.get_mut(&kind).and_then(|slot| slot.task.take());
            if let Some(task) = task {
                let abort = task.abort_handle();
                match time::timeout(timeout, task).await {
                    Ok(result) => match UnitExit::from_join(result) {
                        UnitExit::Completed => debug!(unit = %kind, "unit stopped"),
                        other => warn!(unit = %kind, "unit stopped: {other:?}"),
                    },
                    Err(_) => {
                        warn!(unit = %kind, "unit did not stop within {timeout:?}, aborting");
                        abort.abort();
                    }
                }
            }

            self.clear_handle(kind);
        }

        info!("pipeline stopped");
    }

    /// Start the pipeline, keep it running until `shutdown` completes, then stop it
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        self.start();

        let mut ticker = time::interval(self.settings.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }

                _ = ticker.tick() => {
                    self.check_units().await;
                }
            }
        }

        self.stop().await;
    }

    pub fn relay(&self) -> Option<RelayHandle> {
        self.relay.current()
    }

    pub fn dispatcher(&self) -> Option<DispatcherHandle> {
        self.dispatcher.current()
    }

    pub fn recorder(&self) -> Option<RecorderHandle> {
        self.recorder.current()
    }

    pub fn coordinator(&self) -> Option<CoordinatorHandle> {
        self.coordinator.current()
    }

    pub fn scheduler(&self) -> Option<SchedulerHandle> {
        self.scheduler.current()
    }

    pub fn is_running(&self, kind: UnitKind) -> bool {
        self.slots.get(&kind).is_some_and(UnitSlot::is_running)
    }

    pub fn restarts(&self, kind: UnitKind) -> u32 {
        self.slots.get(&kind).map_or(0, |slot| slot.restarts)
    }
}
