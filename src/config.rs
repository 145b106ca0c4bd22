use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::trace;

use crate::Channel;
use crate::actors::scheduler::MAX_INTERVAL;
use crate::notification::MaxAlerts;
use crate::storage::RecipientRecord;
use crate::transport::email::SmtpSettings;
use crate::transport::webhook::WebhookFormat;
use crate::util::{get_sender_email, get_sender_password, get_slack_endpoint};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub sensors: SensorConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Tolerances and recipients written to the store at startup
    #[serde(default)]
    pub seed: SeedConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Measurement interval in seconds
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Throw-away samples taken before the first measurement
    #[serde(default = "default_warmup_samples")]
    pub warmup_samples: u32,

    #[serde(default = "default_warmup_pause_ms")]
    pub warmup_pause_ms: u64,

    /// Producer name attached to every published reading
    #[serde(default = "default_producer")]
    pub producer: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            warmup_samples: default_warmup_samples(),
            warmup_pause_ms: default_warmup_pause_ms(),
            producer: default_producer(),
        }
    }
}

impl SchedulerConfig {
    /// Clamped to `1s..=MAX_INTERVAL`
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1)).min(MAX_INTERVAL)
    }

    pub fn warmup_pause(&self) -> Duration {
        Duration::from_millis(self.warmup_pause_ms)
    }
}

fn default_interval_secs() -> u64 {
    15 * 60
}

fn default_warmup_samples() -> u32 {
    5
}

fn default_warmup_pause_ms() -> u64 {
    1000
}

fn default_producer() -> String {
    "sensor-array".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    #[default]
    Simulated,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
    #[serde(default)]
    pub kind: SensorKind,

    /// Channels the simulated array reports as not available
    #[serde(default)]
    pub unavailable: Vec<Channel>,

    /// Channels that re-use their last good value when a read fails
    #[serde(default = "default_hold_last")]
    pub hold_last: Vec<Channel>,

    /// Decimals readings are rounded to; `null` keeps full precision
    #[serde(default = "default_precision")]
    pub precision: Option<i32>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            kind: SensorKind::default(),
            unavailable: Vec::new(),
            hold_last: default_hold_last(),
            precision: default_precision(),
        }
    }
}

fn default_hold_last() -> Vec<Channel> {
    vec![Channel::AirTemp, Channel::Humidity, Channel::Distance]
}

fn default_precision() -> Option<i32> {
    Some(2)
}

/// Storage backend configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Retention period in days (readings older than this are deleted).
        /// 0 keeps readings forever.
        #[serde(default = "default_retention_days")]
        retention_days: u32,

        #[serde(default = "default_cleanup_interval_hours")]
        cleanup_interval_hours: u32,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            retention_days: default_retention_days(),
            cleanup_interval_hours: default_cleanup_interval_hours(),
        }
    }
}

impl StorageConfig {
    /// Retention policy as (retention, cleanup interval), if old readings are deleted
    pub fn retention(&self) -> Option<(Duration, Duration)> {
        match self {
            StorageConfig::None => None,
            StorageConfig::Sqlite {
                retention_days: 0,
                ..
            } => None,
            StorageConfig::Sqlite {
                retention_days,
                cleanup_interval_hours,
                ..
            } => Some((
                Duration::from_secs(u64::from(*retention_days) * 24 * 3600),
                Duration::from_secs(u64::from((*cleanup_interval_hours).max(1)) * 3600),
            )),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./aquaponics.db")
}

fn default_retention_days() -> u32 {
    365
}

fn default_cleanup_interval_hours() -> u32 {
    24
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    /// Send email and SMS alerts. Requires SMTP credentials.
    #[serde(default = "default_true")]
    pub email_enabled: bool,

    #[serde(default)]
    pub smtp: SmtpConfig,

    /// Chat webhook; falls back to `SLACK_MESSAGE_ENDPOINT` when unset
    pub chat: Option<ChatConfig>,

    #[serde(default)]
    pub email_pacing_ms: u64,

    #[serde(default = "default_sms_pacing_ms")]
    pub sms_pacing_ms: u64,

    #[serde(default)]
    pub max_alerts: MaxAlerts,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            email_enabled: true,
            smtp: SmtpConfig::default(),
            chat: None,
            email_pacing_ms: 0,
            sms_pacing_ms: default_sms_pacing_ms(),
            max_alerts: MaxAlerts::default(),
        }
    }
}

impl NotificationConfig {
    /// Configured chat webhook with its URL resolved
    pub fn resolved_chat(&self) -> Option<ResolvedChat> {
        match &self.chat {
            Some(chat) => {
                let url = chat.url.clone().or_else(get_slack_endpoint)?;
                Some(ResolvedChat {
                    url,
                    format: chat.format,
                    mention: chat.mention.clone(),
                })
            }
            None => get_slack_endpoint().map(|url| ResolvedChat {
                url,
                format: WebhookFormat::Slack,
                mention: None,
            }),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_sms_pacing_ms() -> u64 {
    2000
}

#[derive(Clone, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_smtp_server")]
    pub server: String,

    #[serde(default = "default_smtp_port")]
    pub port: u16,

    /// Sender address; falls back to `SENDER_EMAIL`
    pub sender: Option<String>,

    /// Falls back to `SENDER_PASSWORD`
    pub password: Option<String>,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            server: default_smtp_server(),
            port: default_smtp_port(),
            sender: None,
            password: None,
        }
    }
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("sender", &self.sender)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl SmtpConfig {
    pub fn resolve(&self) -> anyhow::Result<SmtpSettings> {
        let sender = self
            .sender
            .clone()
            .or_else(get_sender_email)
            .context("no SMTP sender configured (set SENDER_EMAIL)")?;
        let password = self
            .password
            .clone()
            .or_else(get_sender_password)
            .context("no SMTP password configured (set SENDER_PASSWORD)")?;

        Ok(SmtpSettings {
            server: self.server.clone(),
            port: self.port,
            sender,
            password,
        })
    }
}

fn default_smtp_server() -> String {
    "smtp.gmail.com".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    #[serde(default)]
    pub format: WebhookFormat,

    pub url: Option<String>,

    /// Discord user id to mention
    pub mention: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedChat {
    pub url: String,
    pub format: WebhookFormat,
    pub mention: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// How long a unit may take to stop before it is aborted
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

fn default_check_interval_secs() -> u64 {
    5
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

/// Bounds as written in the config file, validated when applied
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SeedBounds {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedConfig {
    #[serde(default)]
    pub tolerances: BTreeMap<Channel, SeedBounds>,

    #[serde(default)]
    pub recipients: Vec<RecipientRecord>,
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration file {path}"))?;
    serde_json::from_str(&file_content)
        .with_context(|| format!("invalid configuration file {path}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
