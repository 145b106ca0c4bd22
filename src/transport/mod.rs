//! Outbound notification transports
//!
//! - **Email**: SMTP with STARTTLS ([`email::SmtpTransport`]); also used for
//!   SMS through the carriers' email-to-SMS gateways
//! - **Chat**: JSON webhooks for Slack, Discord or generic receivers
//!   ([`webhook::WebhookTransport`])

pub mod email;
pub mod webhook;

use std::fmt;

use async_trait::async_trait;

pub use email::SmtpTransport;
pub use webhook::WebhookTransport;

/// Errors a transport reports for a single delivery attempt
#[derive(Debug)]
pub enum TransportError {
    /// Address could not be parsed
    InvalidAddress(String),

    /// Message could not be assembled
    InvalidMessage(String),

    /// SMTP session failed or the server refused the message
    Smtp(String),

    /// HTTP request could not be sent
    Request(String),

    /// Webhook responded with a non-success status
    Rejected { status: u16, body: String },

    /// Transport is missing required settings
    NotConfigured(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::InvalidAddress(msg) => write!(f, "invalid address: {msg}"),
            TransportError::InvalidMessage(msg) => write!(f, "invalid message: {msg}"),
            TransportError::Smtp(msg) => write!(f, "smtp delivery failed: {msg}"),
            TransportError::Request(msg) => write!(f, "webhook request failed: {msg}"),
            TransportError::Rejected { status, body } => {
                write!(f, "webhook rejected with status {status}: {body}")
            }
            TransportError::NotConfigured(msg) => write!(f, "transport not configured: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Sends a single email. SMS gateway delivery goes through the same trait.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, address: &str, subject: &str, body: &str) -> Result<(), TransportError>;
}

/// Posts a message to a group chat
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn post(&self, text: &str) -> Result<(), TransportError>;
}
