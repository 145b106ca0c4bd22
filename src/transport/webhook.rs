use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, instrument};

use super::{ChatTransport, TransportError};

/// Payload flavour expected by the receiving webhook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookFormat {
    /// `{"text": ...}`
    #[default]
    Slack,

    /// `{"content": ...}`, optionally mentioning a user
    Discord,

    /// `{"message": ..., "timestamp": ...}`
    Generic,
}

/// Chat transport posting JSON to an incoming webhook
#[derive(Debug, Clone)]
pub struct WebhookTransport {
    client: Client,
    url: String,
    format: WebhookFormat,
    mention: Option<String>,
}

impl WebhookTransport {
    pub fn new(url: impl Into<String>, format: WebhookFormat) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            format,
            mention: None,
        }
    }

    /// Mention a Discord user id in every post
    pub fn with_mention(mut self, user_id: impl Into<String>) -> Self {
        self.mention = Some(user_id.into());
        self
    }

    fn payload(&self, text: &str) -> serde_json::Value {
        match self.format {
            WebhookFormat::Slack => json!({ "text": text }),
            WebhookFormat::Discord => {
                let content = match &self.mention {
                    Some(user_id) => format!("<@{user_id}>\n{text}"),
                    None => text.to_string(),
                };
                json!({ "content": content })
            }
            WebhookFormat::Generic => json!({
                "message": text,
                "timestamp": Utc::now().to_rfc3339(),
            }),
        }
    }
}

#[async_trait]
impl ChatTransport for WebhookTransport {
    #[instrument(skip(self, text), fields(format = ?self.format))]
    async fn post(&self, text: &str) -> Result<(), TransportError> {
        let payload = self.payload(text);

        match self.client.post(&self.url).json(&payload).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    info!("successfully posted chat alert");
                    Ok(())
                } else {
                    let body = response.text().await.unwrap_or_default();
                    error!("chat alert failed with status: {status}");
                    Err(TransportError::Rejected {
                        status: status.as_u16(),
                        body,
                    })
                }
            }
            Err(e) => {
                error!("failed to post chat alert: {e}");
                Err(TransportError::Request(e.to_string()))
            }
        }
    }
}
