//! Notification model shared by the coordinator and the dispatcher
//!
//! A [`Message`] is rendered differently for every delivery channel. The
//! dispatcher reports per-recipient results as a [`DispatchReport`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tolerance::Alert;

pub const EMAIL_SUBJECT: &str = "Aquaponics System Alert";
pub const SMS_SUBJECT: &str = "Aquaponics Alert";
pub const TEST_SUBJECT: &str = "Aquaponics System Test Message";

const EMAIL_PREAMBLE: &str = "The following issues were detected:\n\n";
const SMS_PREAMBLE: &str = "Aquaponics Alert:\n";

/// Delivery channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Email,
    Sms,
    Chat,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Email => f.write_str("email"),
            ChannelKind::Sms => f.write_str("sms"),
            ChannelKind::Chat => f.write_str("chat"),
        }
    }
}

/// A person opted in to one delivery channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,

    /// Email address or phone number, depending on the channel
    pub address: String,

    /// Mobile carrier name, used to pick SMS gateways
    pub carrier: Option<String>,
}

impl Recipient {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            carrier: None,
        }
    }

    pub fn with_carrier(mut self, carrier: impl Into<String>) -> Self {
        self.carrier = Some(carrier.into());
        self
    }
}

/// Recipients of a single dispatch, per channel
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Audience {
    pub email: Vec<Recipient>,
    pub sms: Vec<Recipient>,
}

impl Audience {
    pub fn is_empty(&self) -> bool {
        self.email.is_empty() && self.sms.is_empty()
    }
}

/// Maximum number of alert lines rendered per channel. `None` is unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaxAlerts {
    #[serde(default)]
    pub email: Option<usize>,

    #[serde(default = "default_sms_max_alerts")]
    pub sms: Option<usize>,

    #[serde(default)]
    pub chat: Option<usize>,
}

fn default_sms_max_alerts() -> Option<usize> {
    Some(2)
}

impl Default for MaxAlerts {
    fn default() -> Self {
        Self {
            email: None,
            sms: default_sms_max_alerts(),
            chat: None,
        }
    }
}

impl MaxAlerts {
    pub fn for_channel(&self, kind: ChannelKind) -> Option<usize> {
        match kind {
            ChannelKind::Email => self.email,
            ChannelKind::Sms => self.sms,
            ChannelKind::Chat => self.chat,
        }
    }
}

/// Subject and body of a message rendered for one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub subject: String,
    pub body: String,
}

/// One notification sent to the whole audience
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// The batch of alert lines produced from a single reading
    Alerts { timestamp: i64, lines: Vec<String> },

    /// Connectivity check triggered by an operator
    Test,
}

impl Message {
    pub fn from_alerts(timestamp: i64, alerts: &[Alert]) -> Self {
        Message::Alerts {
            timestamp,
            lines: alerts.iter().map(ToString::to_string).collect(),
        }
    }

    pub fn alert_count(&self) -> usize {
        match self {
            Message::Alerts { lines, .. } => lines.len(),
            Message::Test => 0,
        }
    }

    pub fn render(&self, kind: ChannelKind, max_alerts: &MaxAlerts) -> Rendered {
        let lines = match self {
            Message::Alerts { lines, .. } => lines,
            Message::Test => {
                return Rendered {
                    subject: TEST_SUBJECT.to_string(),
                    body: TEST_SUBJECT.to_string(),
                };
            }
        };

        let limit = max_alerts.for_channel(kind).unwrap_or(usize::MAX);
        let joined = lines
            .iter()
            .take(limit)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n");

        match kind {
            ChannelKind::Email | ChannelKind::Chat => Rendered {
                subject: EMAIL_SUBJECT.to_string(),
                body: format!("{EMAIL_PREAMBLE}{joined}"),
            },
            ChannelKind::Sms => Rendered {
                subject: SMS_SUBJECT.to_string(),
                body: format!("{SMS_PREAMBLE}{joined}"),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    Failed(String),
}

/// Result of delivering a message to one recipient on one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub channel: ChannelKind,
    pub recipient: String,

    /// SMS gateway domain that accepted the message
    pub gateway: Option<String>,

    /// Number of transport attempts made
    pub attempts: usize,

    pub status: DeliveryStatus,
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        self.status == DeliveryStatus::Delivered
    }
}

/// Per-recipient, per-channel outcomes of one dispatch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub outcomes: Vec<DeliveryOutcome>,
}

impl DispatchReport {
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_delivered()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.delivered()
    }

    pub fn is_complete_success(&self) -> bool {
        self.outcomes.iter().all(DeliveryOutcome::is_delivered)
    }

    pub fn outcome(&self, channel: ChannelKind, recipient: &str) -> Option<&DeliveryOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.channel == channel && o.recipient == recipient)
    }

    pub fn for_channel(&self, channel: ChannelKind) -> impl Iterator<Item = &DeliveryOutcome> {
        self.outcomes.iter().filter(move |o| o.channel == channel)
    }
}

impl fmt::Display for DispatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} delivered, {} failed",
            self.delivered(),
            self.failed()
        )
    }
}
