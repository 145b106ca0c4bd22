//! DispatcherActor - Delivers notifications over email, SMS and chat
//!
//! ## Message Flow
//!
//! ```text
//! Dispatch(message, audience) ─┬─► email: recipients in order, paced
//!                              ├─► sms:   recipients in order, paced, gateway fallback
//!                              └─► chat:  one post
//!                                   │
//!                                   ▼
//!                             DispatchReport
//! ```
//!
//! The three channels run concurrently. A failure for one recipient never
//! stops delivery to the others; every attempt ends up in the report.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::config::NotificationConfig;
use crate::gateway::candidate_gateways;
use crate::notification::{
    Audience, ChannelKind, DeliveryOutcome, DeliveryStatus, DispatchReport, MaxAlerts, Message,
    Recipient,
};
use crate::transport::{
    ChatTransport, EmailTransport, SmtpTransport, TransportError, WebhookTransport,
};

use super::UnitTask;
use super::messages::DispatcherCommand;

/// Recipient name used for the chat outcome
pub const CHAT_RECIPIENT: &str = "chat";

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// Pause between two email recipients
    pub email_pacing: Duration,

    /// Pause between two SMS recipients
    pub sms_pacing: Duration,

    pub max_alerts: MaxAlerts,
}

impl DispatcherSettings {
    pub fn from_config(config: &NotificationConfig) -> Self {
        Self {
            email_pacing: Duration::from_millis(config.email_pacing_ms),
            sms_pacing: Duration::from_millis(config.sms_pacing_ms),
            max_alerts: config.max_alerts,
        }
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self::from_config(&NotificationConfig::default())
    }
}

/// Outbound transports; a missing transport fails its deliveries
#[derive(Clone, Default)]
pub struct Transports {
    pub email: Option<Arc<dyn EmailTransport>>,
    pub chat: Option<Arc<dyn ChatTransport>>,
}

impl Transports {
    pub fn new(
        email: Option<Arc<dyn EmailTransport>>,
        chat: Option<Arc<dyn ChatTransport>>,
    ) -> Self {
        Self { email, chat }
    }

    /// Build the transports from configuration and environment
    ///
    /// Fails when email is enabled but the SMTP account is incomplete.
    pub fn from_config(config: &NotificationConfig) -> Result<Self> {
        let email: Option<Arc<dyn EmailTransport>> = if config.email_enabled {
            let settings = config.smtp.resolve()?;
            let transport =
                SmtpTransport::new(&settings).context("failed to set up smtp transport")?;
            info!(
                "email alerts via {}:{} as {}",
                settings.server, settings.port, settings.sender
            );
            Some(Arc::new(transport))
        } else {
            info!("email and SMS alerts disabled");
            None
        };

        let chat: Option<Arc<dyn ChatTransport>> = config.resolved_chat().map(|chat| {
            info!("chat alerts enabled ({:?})", chat.format);
            let transport = WebhookTransport::new(chat.url, chat.format);
            let transport = match chat.mention {
                Some(user_id) => transport.with_mention(user_id),
                None => transport,
            };
            Arc::new(transport) as Arc<dyn ChatTransport>
        });

        Ok(Self { email, chat })
    }
}

pub struct DispatcherActor {
    settings: DispatcherSettings,
    transports: Transports,
    command_rx: mpsc::Receiver<DispatcherCommand>,
}

impl DispatcherActor {
    pub fn new(
        settings: DispatcherSettings,
        transports: Transports,
        command_rx: mpsc::Receiver<DispatcherCommand>,
    ) -> Self {
        Self {
            settings,
            transports,
            command_rx,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) -> Result<()> {
        debug!("starting alert dispatcher");

        while let Some(cmd) = self.command_rx.recv().await {
            match cmd {
                DispatcherCommand::Dispatch {
                    message,
                    audience,
                    respond_to,
                } => {
                    let report = self.dispatch(&message, &audience).await;
                    let _ = respond_to.send(report);
                }

                DispatcherCommand::Shutdown => {
                    debug!("received shutdown command");
                    break;
                }
            }
        }

        debug!("alert dispatcher stopped");
        Ok(())
    }

    #[instrument(skip_all, fields(alerts = message.alert_count()))]
    async fn dispatch(&self, message: &Message, audience: &Audience) -> DispatchReport {
        let (email, sms, chat) = tokio::join!(
            self.deliver_email(message, &audience.email),
            self.deliver_sms(message, &audience.sms),
            self.deliver_chat(message),
        );

        let mut outcomes = email;
        outcomes.extend(sms);
        outcomes.extend(chat);

        let report = DispatchReport { outcomes };
        info!("dispatch finished: {report}");
        report
    }

    async fn deliver_email(&self, message: &Message, recipients: &[Recipient]) -> Vec<DeliveryOutcome> {
        let Some(transport) = self.transport_for(ChannelKind::Email, recipients) else {
            return not_configured(ChannelKind::Email, recipients);
        };

        let rendered = message.render(ChannelKind::Email, &self.settings.max_alerts);
        let mut outcomes = Vec::with_capacity(recipients.len());

        for (index, recipient) in recipients.iter().enumerate() {
            if index > 0 && !self.settings.email_pacing.is_zero() {
                sleep(self.settings.email_pacing).await;
            }

            let status = match transport
                .send(&recipient.address, &rendered.subject, &rendered.body)
                .await
            {
                Ok(()) => {
                    info!(recipient = %recipient.id, channel = "email", "alert delivered");
                    DeliveryStatus::Delivered
                }
                Err(e) => {
                    warn!(recipient = %recipient.id, channel = "email", "delivery failed: {e}");
                    DeliveryStatus::Failed(e.to_string())
                }
            };

            outcomes.push(DeliveryOutcome {
                channel: ChannelKind::Email,
                recipient: recipient.id.clone(),
                gateway: None,
                attempts: 1,
                status,
            });
        }

        outcomes
    }

    async fn deliver_sms(&self, message: &Message, recipients: &[Recipient]) -> Vec<DeliveryOutcome> {
        let Some(transport) = self.transport_for(ChannelKind::Sms, recipients) else {
            return not_configured(ChannelKind::Sms, recipients);
        };

        let rendered = message.render(ChannelKind::Sms, &self.settings.max_alerts);
        let mut outcomes = Vec::with_capacity(recipients.len());

        for (index, recipient) in recipients.iter().enumerate() {
            if index > 0 && !self.settings.sms_pacing.is_zero() {
                sleep(self.settings.sms_pacing).await;
            }

            let candidates = candidate_gateways(&recipient.address, recipient.carrier.as_deref());
            let mut attempts = 0;
            let mut last_error = String::from("no SMS gateway candidates for number");
            let mut accepted_by = None;

            for address in &candidates {
                attempts += 1;
                let gateway = address.split_once('@').map(|(_, domain)| domain.to_string());

                match transport
                    .send(address, &rendered.subject, &rendered.body)
                    .await
                {
                    Ok(()) => {
                        info!(
                            recipient = %recipient.id,
                            channel = "sms",
                            gateway = ?gateway,
                            "alert delivered"
                        );
                        accepted_by = gateway;
                        break;
                    }
                    Err(e) => {
                        debug!(
                            recipient = %recipient.id,
                            channel = "sms",
                            gateway = ?gateway,
                            "gateway attempt failed: {e}"
                        );
                        last_error = e.to_string();
                    }
                }
            }

            let status = if accepted_by.is_some() {
                DeliveryStatus::Delivered
            } else {
                warn!(
                    recipient = %recipient.id,
                    channel = "sms",
                    "delivery failed after {attempts} gateway attempts: {last_error}"
                );
                DeliveryStatus::Failed(last_error)
            };

            outcomes.push(DeliveryOutcome {
                channel: ChannelKind::Sms,
                recipient: recipient.id.clone(),
                gateway: accepted_by,
                attempts,
                status,
            });
        }

        outcomes
    }

    async fn deliver_chat(&self, message: &Message) -> Option<DeliveryOutcome> {
        let transport = self.transports.chat.as_ref()?;
        let rendered = message.render(ChannelKind::Chat, &self.settings.max_alerts);

        let status = match transport.post(&rendered.body).await {
            Ok(()) => {
                info!(channel = "chat", "alert delivered");
                DeliveryStatus::Delivered
            }
            Err(e) => {
                warn!(channel = "chat", "delivery failed: {e}");
                DeliveryStatus::Failed(e.to_string())
            }
        };

        Some(DeliveryOutcome {
            channel: ChannelKind::Chat,
            recipient: CHAT_RECIPIENT.to_string(),
            gateway: None,
            attempts: 1,
            status,
        })
    }

    fn transport_for(
        &self,
        kind: ChannelKind,
        recipients: &[Recipient],
    ) -> Option<&Arc<dyn EmailTransport>> {
        let transport = self.transports.email.as_ref();
        if transport.is_none() && !recipients.is_empty() {
            warn!(
                "{} {kind:?} recipients skipped, email transport not configured",
                recipients.len()
            );
        }
        transport
    }
}

fn not_configured(kind: ChannelKind, recipients: &[Recipient]) -> Vec<DeliveryOutcome> {
    recipients
        .iter()
        .map(|recipient| DeliveryOutcome {
            channel: kind,
            recipient: recipient.id.clone(),
            gateway: None,
            attempts: 0,
            status: DeliveryStatus::Failed(
                TransportError::NotConfigured("no email transport".to_string()).to_string(),
            ),
        })
        .collect()
}

/// Handle for controlling a DispatcherActor
#[derive(Clone)]
pub struct DispatcherHandle {
    sender: mpsc::Sender<DispatcherCommand>,
}

impl DispatcherHandle {
    pub fn spawn(settings: DispatcherSettings, transports: Transports) -> (Self, UnitTask) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let actor = DispatcherActor::new(settings, transports, cmd_rx);
        let task = tokio::spawn(actor.run());

        (Self { sender: cmd_tx }, task)
    }

    /// Deliver a message and wait for the per-recipient report
    pub async fn dispatch(&self, message: Message, audience: Audience) -> Result<DispatchReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DispatcherCommand::Dispatch {
                message,
                audience,
                respond_to: tx,
            })
            .await
            .context("failed to send Dispatch command")?;

        rx.await.context("failed to receive response")
    }

    /// Send the fixed test message to everyone
    pub async fn send_test(&self, audience: Audience) -> Result<DispatchReport> {
        self.dispatch(Message::Test, audience).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(DispatcherCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
