//! CoordinatorActor - Turns readings into alert dispatches
//!
//! ## Message Flow
//!
//! ```text
//! ReadingEvent → fetch tolerances → evaluate → (priming? mute?) → fetch recipients → Dispatch
//!                                                                                     │
//!                                               DispatcherActor ◄─────────────────────┘
//! ```
//!
//! ## State
//!
//! `Starting → Priming → Armed → Stopped`. Alerts found on the first
//! evaluated reading are suppressed, since probes that just powered on
//! report settling values. A reading only counts as evaluated when
//! tolerances were fetched and at least one is configured.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::notification::{Audience, ChannelKind, Message};
use crate::storage::{RecipientDirectory, ToleranceSource};
use crate::tolerance::evaluate;

use super::dispatcher::DispatcherHandle;
use super::messages::{
    CoordinatorCommand, CoordinatorState, CoordinatorStatus, CycleOutcome, ReadingEvent,
    Subscriber,
};
use super::relay::RelayHandle;
use super::{CurrentHandle, UnitTask};

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Id used when subscribing to the relay
    pub subscriber_id: String,

    /// Readings buffered while a dispatch is in flight
    pub queue_capacity: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            subscriber_id: "notification-coordinator".to_string(),
            queue_capacity: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mute {
    Off,
    Indefinitely,
    Until(Instant),
}

impl Mute {
    /// A deadline past what `Instant` can represent mutes indefinitely
    fn starting_now(duration: Option<Duration>) -> Self {
        match duration.and_then(|d| Some((d, Instant::now().checked_add(d)?))) {
            Some((duration, deadline)) => {
                info!("alerts muted for {duration:?}");
                Mute::Until(deadline)
            }
            None => {
                info!("alerts muted until unmuted");
                Mute::Indefinitely
            }
        }
    }
}

pub struct CoordinatorActor {
    settings: CoordinatorSettings,
    relay: CurrentHandle<RelayHandle>,
    dispatcher: CurrentHandle<DispatcherHandle>,
    tolerances: Arc<dyn ToleranceSource>,
    recipients: Arc<dyn RecipientDirectory>,
    command_rx: mpsc::Receiver<CoordinatorCommand>,

    state: CoordinatorState,
    mute: Mute,
    processed: u64,
    last_outcome: Option<CycleOutcome>,
}

impl CoordinatorActor {
    pub fn new(
        settings: CoordinatorSettings,
        relay: CurrentHandle<RelayHandle>,
        dispatcher: CurrentHandle<DispatcherHandle>,
        tolerances: Arc<dyn ToleranceSource>,
        recipients: Arc<dyn RecipientDirectory>,
        command_rx: mpsc::Receiver<CoordinatorCommand>,
    ) -> Self {
        Self {
            settings,
            relay,
            dispatcher,
            tolerances,
            recipients,
            command_rx,
            state: CoordinatorState::Starting,
            mute: Mute::Off,
            processed: 0,
            last_outcome: None,
        }
    }

    /// Run until Shutdown
    ///
    /// Returns an error when the relay is unreachable at start or closes the
    /// subscription, so the supervisor restarts the coordinator.
    #[instrument(skip(self), fields(subscriber = %self.settings.subscriber_id))]
    pub async fn run(mut self) -> Result<()> {
        debug!("starting notification coordinator");

        let relay = self.relay.get().context("stats relay unavailable")?;
        let (subscriber, mut readings) = Subscriber::channel(
            self.settings.subscriber_id.clone(),
            self.settings.queue_capacity,
        );
        relay
            .subscribe(subscriber)
            .await
            .context("failed to subscribe to stats relay")?;

        self.state = CoordinatorState::Priming;
        info!("subscribed to stats relay, first reading will prime the coordinator");

        let result = loop {
            tokio::select! {
                event = readings.recv() => match event {
                    Some(event) => self.process(event).await,
                    None => break Err(anyhow!("stats relay closed the subscription")),
                },

                cmd = self.command_rx.recv() => match cmd {
                    Some(CoordinatorCommand::GetStatus { respond_to }) => {
                        let _ = respond_to.send(self.status());
                    }

                    Some(CoordinatorCommand::Mute { duration }) => {
                        self.mute = Mute::starting_now(duration);
                    }

                    Some(CoordinatorCommand::Unmute) => {
                        info!("alerts unmuted");
                        self.mute = Mute::Off;
                    }

                    Some(CoordinatorCommand::Shutdown) => {
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

        // unsubscribe before the queue goes away
        if let Some(relay) = self.relay.get()
            && let Err(e) = relay.unsubscribe(&self.settings.subscriber_id).await
        {
            debug!("could not unsubscribe: {e:#}");
        }
        drop(readings);

        // Stopped: terminal, the actor is consumed here
        debug!("notification coordinator stopped");
        result
    }

    async fn process(&mut self, event: ReadingEvent) {
        let outcome = self.handle_reading(&event).await;
        trace!("cycle outcome: {outcome:?}");
        self.processed += 1;
        self.last_outcome = Some(outcome);
    }

    #[instrument(skip_all, fields(producer = %event.producer, timestamp = event.reading.timestamp))]
    async fn handle_reading(&mut self, event: &ReadingEvent) -> CycleOutcome {
        let tolerances = match self.tolerances.fetch_all().await {
            Ok(tolerances) => tolerances,
            Err(e) => {
                error!("failed to fetch tolerances: {e}");
                return CycleOutcome::Aborted(format!("failed to fetch tolerances: {e}"));
            }
        };

        if tolerances.is_empty() {
            info!("no tolerances configured, nothing to check");
            return CycleOutcome::NothingToCheck;
        }

        let evaluation = evaluate(&event.reading, &tolerances);
        for channel in &evaluation.unchecked {
            warn!("no tolerance configured for {channel}, value not checked");
        }

        let alerts = evaluation.alerts.len();

        if self.state == CoordinatorState::Priming {
            self.state = CoordinatorState::Armed;

            if alerts > 0 {
                info!("suppressing {alerts} alerts on the first reading");
                for line in evaluation.lines() {
                    debug!("suppressed: {line}");
                }
                return CycleOutcome::Suppressed { alerts };
            }
            return CycleOutcome::AllClear;
        }

        if alerts == 0 {
            trace!("all values within tolerance");
            return CycleOutcome::AllClear;
        }

        for line in evaluation.lines() {
            warn!("{line}");
        }

        if self.is_muted() {
            info!("alerts muted, {alerts} alerts not dispatched");
            return CycleOutcome::Muted { alerts };
        }

        let audience = match self.audience().await {
            Ok(audience) => audience,
            Err(e) => {
                error!("{e:#}");
                return CycleOutcome::Aborted(format!("{e:#}"));
            }
        };

        let Some(dispatcher) = self.dispatcher.get() else {
            error!("alert dispatcher unavailable, {alerts} alerts dropped");
            return CycleOutcome::NoDispatcher { alerts };
        };

        let message = Message::from_alerts(event.reading.timestamp, &evaluation.alerts);

        match dispatcher.dispatch(message, audience).await {
            Ok(report) => {
                info!("dispatched {alerts} alerts: {report}");
                CycleOutcome::Dispatched(report)
            }
            Err(e) => {
                error!("alert dispatcher unavailable, {alerts} alerts dropped: {e:#}");
                CycleOutcome::NoDispatcher { alerts }
            }
        }
    }

    async fn audience(&self) -> Result<Audience> {
        let email = self
            .recipients
            .fetch_opted_in(ChannelKind::Email)
            .await
            .context("failed to fetch email recipients")?;

        let sms = self
            .recipients
            .fetch_opted_in(ChannelKind::Sms)
            .await
            .context("failed to fetch sms recipients")?;

        Ok(Audience { email, sms })
    }

    fn is_muted(&mut self) -> bool {
        match self.mute {
            Mute::Off => false,
            Mute::Indefinitely => true,
            Mute::Until(deadline) if Instant::now() < deadline => true,
            Mute::Until(_) => {
                info!("mute expired");
                self.mute = Mute::Off;
                false
            }
        }
    }

    fn status(&self) -> CoordinatorStatus {
        let muted = match self.mute {
            Mute::Off => false,
            Mute::Indefinitely => true,
            Mute::Until(deadline) => Instant::now() < deadline,
        };

        CoordinatorStatus {
            state: self.state,
            muted,
            processed: self.processed,
            last_outcome: self.last_outcome.clone(),
        }
    }
}

/// Handle for controlling a CoordinatorActor
#[derive(Clone)]
pub struct CoordinatorHandle {
    sender: mpsc::Sender<CoordinatorCommand>,
}

impl CoordinatorHandle {
    pub fn spawn(
        settings: CoordinatorSettings,
        relay: CurrentHandle<RelayHandle>,
        dispatcher: CurrentHandle<DispatcherHandle>,
        tolerances: Arc<dyn ToleranceSource>,
        recipients: Arc<dyn RecipientDirectory>,
    ) -> (Self, UnitTask) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor =
            CoordinatorActor::new(settings, relay, dispatcher, tolerances, recipients, cmd_rx);
        let task = tokio::spawn(actor.run());

        (Self { sender: cmd_tx }, task)
    }

    pub async fn status(&self) -> Result<CoordinatorStatus> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorCommand::GetStatus { respond_to: tx })
            .await
            .context("failed to send GetStatus command")?;

        rx.await.context("failed to receive response")
    }

    /// Stop dispatching alerts; `None` mutes until [`unmute`](Self::unmute)
    pub async fn mute(&self, duration: Option<Duration>) -> Result<()> {
        self.sender
            .send(CoordinatorCommand::Mute { duration })
            .await
            .context("failed to send Mute command")?;
        Ok(())
    }

    pub async fn unmute(&self) -> Result<()> {
        self.sender
            .send(CoordinatorCommand::Unmute)
            .await
            .context("failed to send Unmute command")?;
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(CoordinatorCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
