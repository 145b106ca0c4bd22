//! Building a running pipeline from a configuration file

use std::io::Write;
use std::time::Duration;

use crate::helpers::*;
use aquaponics_telemetry::{
    Channel,
    actors::dispatcher::{CHAT_RECIPIENT, Transports},
    actors::messages::CycleOutcome,
    config::read_config_file,
    notification::{ChannelKind, DeliveryStatus},
    sensors::shared,
    storage,
    supervisor::{Collaborators, PipelineSettings, Supervisor},
};
use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn write_config(contents: &serde_json::Value) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[tokio::test]
async fn test_pipeline_settings_follow_config_file() {
    let file = write_config(&json!({
        "scheduler": { "interval_secs": 300, "warmup_samples": 2, "warmup_pause_ms": 250, "producer": "greenhouse" },
        "storage": { "backend": "sqlite", "retention_days": 30, "cleanup_interval_hours": 6 },
        "notifications": { "email_pacing_ms": 100, "sms_pacing_ms": 1500, "max_alerts": { "sms": 3 } },
        "supervisor": { "check_interval_secs": 2, "shutdown_timeout_secs": 4 }
    }));

    let config = read_config_file(file.path().to_str().unwrap()).unwrap();
    let settings = PipelineSettings::from_config(&config);

    assert_eq!(settings.scheduler.interval, Duration::from_secs(300));
    assert_eq!(settings.scheduler.warmup_samples, 2);
    assert_eq!(settings.scheduler.warmup_pause, Duration::from_millis(250));
    assert_eq!(settings.scheduler.producer, "greenhouse");
    assert_eq!(settings.dispatcher.email_pacing, Duration::from_millis(100));
    assert_eq!(settings.dispatcher.sms_pacing, Duration::from_millis(1500));
    assert_eq!(settings.dispatcher.max_alerts.sms, Some(3));
    assert_eq!(settings.check_interval, Duration::from_secs(2));
    assert_eq!(settings.shutdown_timeout, Duration::from_secs(4));

    let retention = settings.recorder.retention.unwrap();
    assert_eq!(retention.max_age, Duration::from_secs(30 * 24 * 3600));
    assert_eq!(retention.cleanup_interval, Duration::from_secs(6 * 3600));
}

#[tokio::test]
async fn test_seeded_config_drives_alerts_to_chat() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let file = write_config(&json!({
        "scheduler": { "interval_secs": 86400, "warmup_samples": 0 },
        "storage": { "backend": "none" },
        "notifications": {
            "email_enabled": false,
            "chat": { "format": "slack", "url": format!("{}/hook", mock_server.uri()) }
        },
        "supervisor": { "check_interval_secs": 1, "shutdown_timeout_secs": 2 },
        "seed": {
            "tolerances": {
                "TDS": { "min": 0, "max": 700 },
                "pH": { "min": 9, "max": 3 }
            },
            "recipients": [ { "id": "ana", "email": "ana@example.com" } ]
        }
    }));

    let config = read_config_file(file.path().to_str().unwrap()).unwrap();
    let storage = storage::open(&config.storage).await.unwrap();

    // the inverted pH range is skipped
    let (tolerances, recipients) = storage::apply_seed(storage.settings.as_ref(), &config.seed)
        .await
        .unwrap();
    assert_eq!((tolerances, recipients), (1, 1));
    assert!(!storage.tolerances.fetch_all().await.unwrap().contains_key(&Channel::Ph));

    let (source, script) = ScriptedSource::new();
    let collaborators = Collaborators {
        source: shared(source),
        storage,
        transports: Transports::from_config(&config.notifications).unwrap(),
    };
    let mut supervisor = Supervisor::new(collaborators, PipelineSettings::from_config(&config));
    supervisor.start();
    wait_for_subscribers(&supervisor, 2).await;

    let coordinator = supervisor.coordinator().unwrap();
    let scheduler = supervisor.scheduler().unwrap();

    script.lock().unwrap().push_back(reading(350.0, 7.0));
    script.lock().unwrap().push_back(reading(900.0, 7.0));
    scheduler.measure_now().await.unwrap();
    scheduler.measure_now().await.unwrap();

    let status = wait_for_processed(&coordinator, 2).await;
    let report = assert_matches!(status.last_outcome, Some(CycleOutcome::Dispatched(report)) => report);

    assert_eq!(
        report.outcome(ChannelKind::Chat, CHAT_RECIPIENT).unwrap().status,
        DeliveryStatus::Delivered
    );
    // email is disabled, so the recipient is reported but not contacted
    let email = report.outcome(ChannelKind::Email, "ana").unwrap();
    assert_eq!(email.attempts, 0);
    assert!(!email.is_delivered());

    supervisor.stop().await;
}
