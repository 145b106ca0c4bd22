//! Stored record types
//!
//! Readings are stored with their channel values as a JSON object, which
//! keeps the "not available" marker (`null`) distinct from channels that
//! were never sampled.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::StorageResult;
use crate::notification::{ChannelKind, Recipient};
use crate::{Channel, Reading};

/// A persisted reading
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingRow {
    /// Name of the producer that published the reading
    pub producer: String,

    pub reading: Reading,

    /// When the recorder received the reading
    pub recorded_at: DateTime<Utc>,
}

impl ReadingRow {
    pub fn new(producer: impl Into<String>, reading: Reading) -> Self {
        Self {
            producer: producer.into(),
            reading,
            recorded_at: Utc::now(),
        }
    }

    pub fn timestamp(&self) -> i64 {
        self.reading.timestamp
    }

    pub fn values_json(&self) -> StorageResult<String> {
        Ok(serde_json::to_string(&self.reading.values)?)
    }

    pub fn from_parts(
        producer: String,
        timestamp: i64,
        recorded_at_millis: i64,
        values_json: &str,
    ) -> StorageResult<Self> {
        let values: BTreeMap<Channel, Option<f64>> = serde_json::from_str(values_json)?;
        Ok(Self {
            producer,
            reading: Reading { timestamp, values },
            recorded_at: DateTime::from_timestamp_millis(recorded_at_millis).unwrap_or_else(Utc::now),
        })
    }
}

fn default_opt_in() -> bool {
    true
}

/// A person known to the recipient directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientRecord {
    pub id: String,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub phone: Option<String>,

    #[serde(default)]
    pub carrier: Option<String>,

    #[serde(default = "default_opt_in")]
    pub email_notifications: bool,

    #[serde(default = "default_opt_in")]
    pub sms_notifications: bool,
}

impl RecipientRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            phone: None,
            carrier: None,
            email_notifications: true,
            sms_notifications: true,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>, carrier: Option<String>) -> Self {
        self.phone = Some(phone.into());
        self.carrier = carrier;
        self
    }

    /// The delivery target for a channel, if the person opted in and has an
    /// address for it
    pub fn recipient_for(&self, kind: ChannelKind) -> Option<Recipient> {
        let non_empty = |value: &Option<String>| value.clone().filter(|v| !v.trim().is_empty());

        match kind {
            ChannelKind::Email if self.email_notifications => {
                non_empty(&self.email).map(|address| Recipient::new(&self.id, address))
            }
            ChannelKind::Sms if self.sms_notifications => non_empty(&self.phone).map(|address| {
                Recipient {
                    id: self.id.clone(),
                    address,
                    carrier: self.carrier.clone(),
                }
            }),
            _ => None,
        }
    }
}
