use async_trait::async_trait;
use lettre::message::{Mailbox, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use tracing::{debug, instrument};

use super::{EmailTransport, TransportError};

/// Resolved SMTP account settings
#[derive(Clone)]
pub struct SmtpSettings {
    pub server: String,
    pub port: u16,
    pub sender: String,
    pub password: String,
}

/// SMTP client authenticated as the alert sender
pub struct SmtpTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
}

impl SmtpTransport {
    pub fn new(settings: &SmtpSettings) -> Result<Self, TransportError> {
        let sender: Mailbox = settings
            .sender
            .parse()
            .map_err(|e| TransportError::InvalidAddress(format!("{}: {e}", settings.sender)))?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.server)
            .map_err(|e| TransportError::Smtp(e.to_string()))?
            .port(settings.port)
            .credentials(Credentials::new(
                settings.sender.clone(),
                settings.password.clone(),
            ))
            .build();

        Ok(Self { mailer, sender })
    }
}

#[async_trait]
impl EmailTransport for SmtpTransport {
    #[instrument(skip(self, body))]
    async fn send(&self, address: &str, subject: &str, body: &str) -> Result<(), TransportError> {
        let to: Mailbox = address
            .parse()
            .map_err(|e| TransportError::InvalidAddress(format!("{address}: {e}")))?;

        let email = lettre::Message::builder()
            .from(self.sender.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| TransportError::InvalidMessage(e.to_string()))?;

        self.mailer
            .send(email)
            .await
            .map_err(|e| TransportError::Smtp(e.to_string()))?;

        debug!("email accepted by smtp server");
        Ok(())
    }
}
