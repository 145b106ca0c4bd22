//! SchedulerActor - Measures the sensor array on a fixed schedule
//!
//! ## Message Flow
//!
//! ```text
//! Warm-up samples → Timer fires → Measure → Publish ReadingEvent → RelayActor
//!                       ↑
//!                       └─── Commands (MeasureNow, UpdateInterval, GetStatus, Shutdown)
//! ```
//!
//! Ticks are anchored to the previous nominal tick rather than to the end
//! of the measurement, so slow measurements do not make the schedule drift.
//! A measurement that runs past the following tick restarts the schedule
//! from the moment it finished.

use std::pin::Pin;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Sleep, sleep, sleep_until};
use tracing::{debug, error, instrument, trace, warn};

use crate::Reading;
use crate::config::SchedulerConfig;
use crate::sensors::SharedSource;

use super::messages::{PublishOutcome, ReadingEvent, SchedulerCommand, SchedulerStatus};
use super::relay::RelayHandle;
use super::{CurrentHandle, UnitTask};

const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Longest accepted measurement interval
pub const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 3600);

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub warmup_samples: u32,
    pub warmup_pause: Duration,
    pub producer: String,
}

impl SchedulerSettings {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            interval: config.interval(),
            warmup_samples: config.warmup_samples,
            warmup_pause: config.warmup_pause(),
            producer: config.producer.clone(),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

/// Drift-free tick arithmetic
#[derive(Debug, Clone)]
pub struct TickSchedule {
    interval: Duration,
    last_tick: Instant,
}

impl TickSchedule {
    pub fn new(interval: Duration, anchor: Instant) -> Self {
        Self {
            interval: interval.clamp(MIN_INTERVAL, MAX_INTERVAL),
            last_tick: anchor,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn next_tick(&self) -> Instant {
        self.last_tick + self.interval
    }

    /// Record that the cycle due at [`next_tick`](Self::next_tick) finished at `finished`
    pub fn complete(&mut self, finished: Instant) {
        let nominal = self.next_tick();

        if finished >= nominal + self.interval {
            warn!(
                "measurement overran the schedule by {:?}, restarting from now",
                finished - nominal
            );
            self.last_tick = finished;
        } else {
            self.last_tick = nominal;
        }
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval.clamp(MIN_INTERVAL, MAX_INTERVAL);
    }
}

/// Single-shot timer that can be re-armed; arming cancels the pending deadline
#[derive(Default)]
pub struct Timer {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, deadline: Instant) {
        self.sleep = Some(Box::pin(sleep_until(deadline)));
    }

    pub fn cancel(&mut self) {
        self.sleep = None;
    }

    pub fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.sleep.as_ref().map(|sleep| sleep.deadline())
    }

    /// Completes when the armed deadline passes; never completes while disarmed
    pub async fn fired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.sleep = None;
            }
            None => std::future::pending().await,
        }
    }
}

pub struct SchedulerActor {
    settings: SchedulerSettings,

    /// Shared with earlier incarnations so hardware is opened once
    source: SharedSource,

    relay: CurrentHandle<RelayHandle>,

    command_rx: mpsc::Receiver<SchedulerCommand>,

    timer: Timer,

    measurements: u64,
    failures: u64,
}

impl SchedulerActor {
    pub fn new(
        settings: SchedulerSettings,
        source: SharedSource,
        relay: CurrentHandle<RelayHandle>,
        command_rx: mpsc::Receiver<SchedulerCommand>,
    ) -> Self {
        Self {
            settings,
            source,
            relay,
            command_rx,
            timer: Timer::new(),
            measurements: 0,
            failures: 0,
        }
    }

    #[instrument(skip(self), fields(producer = %self.settings.producer))]
    pub async fn run(mut self) -> Result<()> {
        debug!("starting telemetry scheduler");

        self.warm_up().await;

        let mut schedule = TickSchedule::new(self.settings.interval, Instant::now());
        self.timer.arm(schedule.next_tick());

        loop {
            tokio::select! {
                () = self.timer.fired() => {
                    if let Err(e) = self.cycle().await {
                        error!("measurement cycle failed: {e:#}");
                    }
                    schedule.complete(Instant::now());
                    self.timer.arm(schedule.next_tick());
                }

                cmd = self.command_rx.recv() => match cmd {
                    Some(SchedulerCommand::MeasureNow { respond_to }) => {
                        debug!("received MeasureNow command");
                        let result = self.cycle().await;
                        let _ = respond_to.send(result);
                    }

                    Some(SchedulerCommand::UpdateInterval { interval }) => {
                        schedule.set_interval(interval);
                        self.settings.interval = schedule.interval();
                        debug!("interval updated to {:?}", self.settings.interval);
                        self.timer.arm(schedule.next_tick());
                    }

                    Some(SchedulerCommand::GetStatus { respond_to }) => {
                        let _ = respond_to.send(self.status());
                    }

                    Some(SchedulerCommand::Shutdown) => {
                        debug!("received shutdown command");
                        break;
                    }

                    None => {
                        warn!("command channel closed, shutting down");
                        break;
                    }
                }
            }
        }

        self.timer.cancel();
        debug!("telemetry scheduler stopped");
        Ok(())
    }

    /// Throw-away samples so the probes settle; failures are not fatal
    async fn warm_up(&mut self) {
        let samples = self.settings.warmup_samples;
        if samples == 0 {
            return;
        }

        debug!("stabilizing sensors with {samples} samples");

        for sample in 1..=samples {
            if sample > 1 {
                sleep(self.settings.warmup_pause).await;
            }

            if let Err(e) = self.source.lock().await.stabilize().await {
                warn!("stabilization sample {sample} failed: {e:#}");
            }
        }
    }

    async fn cycle(&mut self) -> Result<Reading> {
        let result = self.measure_and_publish().await;
        match &result {
            Ok(_) => self.measurements += 1,
            Err(_) => self.failures += 1,
        }
        result
    }

    async fn measure_and_publish(&self) -> Result<Reading> {
        let reading = self
            .source
            .lock()
            .await
            .measure()
            .await
            .context("failed to measure")?;

        trace!("measured reading at {}", reading.timestamp);

        let relay = self
            .relay
            .get()
            .context("stats relay unavailable, reading dropped")?;

        let event = ReadingEvent::new(self.settings.producer.clone(), reading.clone());

        match relay
            .publish(event)
            .await
            .context("failed to publish reading")?
        {
            PublishOutcome::Delivered { subscribers, .. } => {
                debug!(
                    "published reading at {} to {subscribers} subscribers",
                    reading.timestamp
                );
                Ok(reading)
            }
            PublishOutcome::Stale { last_timestamp } => bail!(
                "reading at {} is not newer than {last_timestamp}",
                reading.timestamp
            ),
        }
    }

    fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            interval: self.settings.interval,
            measurements: self.measurements,
            failures: self.failures,
            timer_armed: self.timer.is_armed(),
        }
    }
}

/// Handle for controlling a SchedulerActor
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    pub fn spawn(
        settings: SchedulerSettings,
        source: SharedSource,
        relay: CurrentHandle<RelayHandle>,
    ) -> (Self, UnitTask) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor = SchedulerActor::new(settings, source, relay, cmd_rx);
        let task = tokio::spawn(actor.run());

        (Self { sender: cmd_tx }, task)
    }

    /// Measure and publish immediately
    pub async fn measure_now(&self) -> Result<Reading> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::MeasureNow { respond_to: tx })
            .await
            .context("failed to send MeasureNow command")?;

        rx.await.context("failed to receive response")?
    }

    pub async fn update_interval(&self, interval: Duration) -> Result<()> {
        self.sender
            .send(SchedulerCommand::UpdateInterval { interval })
            .await
            .context("failed to send UpdateInterval command")?;
        Ok(())
    }

    pub async fn status(&self) -> Result<SchedulerStatus> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::GetStatus { respond_to: tx })
            .await
            .context("failed to send GetStatus command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(SchedulerCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
