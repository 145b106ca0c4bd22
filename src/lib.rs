pub mod actors;
pub mod config;
pub mod gateway;
pub mod notification;
pub mod sensors;
pub mod storage;
pub mod supervisor;
pub mod tolerance;
pub mod transport;
pub mod util;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named sensor channel of the installation.
///
/// The declaration order is the canonical channel order: maps keyed by
/// `Channel` iterate in this order, which keeps generated alert messages
/// deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Channel {
    #[serde(rename = "TDS")]
    Tds,
    #[serde(rename = "air_temp")]
    AirTemp,
    #[serde(rename = "distance")]
    Distance,
    #[serde(rename = "humidity")]
    Humidity,
    #[serde(rename = "pH")]
    Ph,
    #[serde(rename = "water_temp")]
    WaterTemp,
    #[serde(rename = "flow")]
    Flow,
    #[serde(rename = "dissolved_oxygen")]
    DissolvedOxygen,
}

impl Channel {
    pub const ALL: [Channel; 8] = [
        Channel::Tds,
        Channel::AirTemp,
        Channel::Distance,
        Channel::Humidity,
        Channel::Ph,
        Channel::WaterTemp,
        Channel::Flow,
        Channel::DissolvedOxygen,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Tds => "TDS",
            Channel::AirTemp => "air_temp",
            Channel::Distance => "distance",
            Channel::Humidity => "humidity",
            Channel::Ph => "pH",
            Channel::WaterTemp => "water_temp",
            Channel::Flow => "flow",
            Channel::DissolvedOxygen => "dissolved_oxygen",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a channel name that is not part of the installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownChannel(pub String);

impl fmt::Display for UnknownChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown sensor channel `{}`", self.0)
    }
}

impl std::error::Error for UnknownChannel {}

impl FromStr for Channel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|channel| channel.as_str() == s)
            .ok_or_else(|| UnknownChannel(s.to_string()))
    }
}

/// A snapshot of all sensor channels at one instant.
///
/// A channel mapped to `None` is present but "not available": its sensor
/// failed to produce a value this cycle. A channel missing from the map was
/// not sampled at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Seconds since the Unix epoch
    pub timestamp: i64,

    pub values: BTreeMap<Channel, Option<f64>>,
}

impl Reading {
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            values: BTreeMap::new(),
        }
    }

    pub fn now() -> Self {
        Self::new(Utc::now().timestamp())
    }

    /// Add a channel value. Non-finite values are recorded as not available.
    pub fn with(mut self, channel: Channel, value: f64) -> Self {
        self.set(channel, value);
        self
    }

    pub fn with_unavailable(mut self, channel: Channel) -> Self {
        self.values.insert(channel, None);
        self
    }

    pub fn set(&mut self, channel: Channel, value: f64) {
        let value = value.is_finite().then_some(value);
        self.values.insert(channel, value);
    }

    /// The channel's value, or `None` if it is missing or not available
    pub fn value(&self, channel: Channel) -> Option<f64> {
        self.values.get(&channel).copied().flatten()
    }

    pub fn contains(&self, channel: Channel) -> bool {
        self.values.contains_key(&channel)
    }

    /// Round every available value to the given number of decimals
    pub fn rounded(mut self, decimals: i32) -> Self {
        let factor = 10f64.powi(decimals);
        for value in self.values.values_mut().flatten() {
            *value = (*value * factor).round() / factor;
        }
        self
    }

    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }
}
