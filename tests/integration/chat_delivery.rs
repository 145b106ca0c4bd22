//! Chat webhook delivery through the dispatcher against a mock HTTP server

use std::sync::Arc;

use crate::helpers::*;
use aquaponics_telemetry::{
    actors::dispatcher::{CHAT_RECIPIENT, DispatcherHandle, DispatcherSettings, Transports},
    notification::{Audience, ChannelKind, DeliveryStatus, Message, Recipient, TEST_SUBJECT},
    transport::{
        ChatTransport, EmailTransport,
        webhook::{WebhookFormat, WebhookTransport},
    },
};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn dispatcher(chat: WebhookTransport, email: Arc<RecordingEmail>) -> DispatcherHandle {
    let transports = Transports::new(
        Some(email as Arc<dyn EmailTransport>),
        Some(Arc::new(chat) as Arc<dyn ChatTransport>),
    );
    let (handle, _task) = DispatcherHandle::spawn(DispatcherSettings::default(), transports);
    handle
}

#[tokio::test]
async fn test_send_test_posts_test_subject() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/services/hook"))
        .and(body_json(json!({ "text": TEST_SUBJECT })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let email = Arc::new(RecordingEmail::default());
    let dispatcher = dispatcher(
        WebhookTransport::new(
            format!("{}/services/hook", mock_server.uri()),
            WebhookFormat::Slack,
        ),
        email.clone(),
    );

    let audience = Audience {
        email: vec![Recipient::new("alice", "alice@example.com")],
        sms: Vec::new(),
    };
    let report = dispatcher.send_test(audience).await.unwrap();

    assert!(report.is_complete_success());
    assert_eq!(report.delivered(), 2);
    assert_eq!(email.sent()[0].subject, TEST_SUBJECT);
    assert_eq!(email.sent()[0].body, TEST_SUBJECT);

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_discord_alert_mentions_user() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/webhooks/1/abc"))
        .and(body_json(json!({
            "content": "<@4242>\nThe following issues were detected:\n\nTDS is above maximum: 900 (maximum: 700)"
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dispatcher = dispatcher(
        WebhookTransport::new(
            format!("{}/api/webhooks/1/abc", mock_server.uri()),
            WebhookFormat::Discord,
        )
        .with_mention("4242"),
        Arc::new(RecordingEmail::default()),
    );

    let message = Message::Alerts {
        timestamp: 1_700_000_000,
        lines: vec!["TDS is above maximum: 900 (maximum: 700)".to_string()],
    };
    let report = dispatcher
        .dispatch(message, Audience::default())
        .await
        .unwrap();

    let chat = report.outcome(ChannelKind::Chat, CHAT_RECIPIENT).unwrap();
    assert_eq!(chat.status, DeliveryStatus::Delivered);

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rejected_post_is_reported_without_affecting_email() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&mock_server)
        .await;

    let email = Arc::new(RecordingEmail::default());
    let dispatcher = dispatcher(
        WebhookTransport::new(mock_server.uri(), WebhookFormat::Generic),
        email.clone(),
    );

    let audience = Audience {
        email: vec![Recipient::new("alice", "alice@example.com")],
        sms: Vec::new(),
    };
    let message = Message::Alerts {
        timestamp: 1_700_000_000,
        lines: vec!["pH is below minimum: 5.9 (minimum: 6)".to_string()],
    };
    let report = dispatcher.dispatch(message, audience).await.unwrap();

    assert_eq!(report.delivered(), 1);
    assert_eq!(report.failed(), 1);

    let chat = report.outcome(ChannelKind::Chat, CHAT_RECIPIENT).unwrap();
    assert!(matches!(&chat.status, DeliveryStatus::Failed(reason) if reason.contains("500")));
    assert_eq!(email.sent().len(), 1);

    dispatcher.shutdown().await.unwrap();
}
