//! End-to-end flow: scheduler → relay → coordinator/recorder → dispatcher

use crate::helpers::*;
use aquaponics_telemetry::{
    Channel, Reading,
    actors::messages::{CoordinatorState, CycleOutcome},
    notification::{ChannelKind, EMAIL_SUBJECT, SMS_SUBJECT},
    storage::{RecipientRecord, StorageBundle},
};
use assert_matches::assert_matches;
use pretty_assertions::assert_eq;

async fn seeded_pipeline() -> TestPipeline {
    let pipeline = TestPipeline::new(StorageBundle::memory(), RecordingEmail::default());

    pipeline.tolerate(Channel::Tds, Some(0.0), Some(700.0)).await;
    pipeline.tolerate(Channel::Ph, Some(6.0), Some(8.0)).await;
    pipeline.tolerate(Channel::WaterTemp, Some(20.0), Some(30.0)).await;

    pipeline
        .storage
        .settings
        .upsert_recipient(
            RecipientRecord::new("alice")
                .with_email("alice@example.com")
                .with_phone("555-123-4567", Some("T-Mobile".to_string())),
        )
        .await
        .unwrap();

    pipeline
}

#[tokio::test]
async fn test_first_reading_primes_then_alerts_are_dispatched() {
    let mut pipeline = seeded_pipeline().await;
    pipeline.start().await;

    assert_eq!(
        pipeline.coordinator().status().await.unwrap().state,
        CoordinatorState::Priming
    );

    // out-of-range values on startup are not sent
    let outcome = pipeline.measure(reading(1000.0, 5.5)).await;
    assert_eq!(outcome, CycleOutcome::Suppressed { alerts: 2 });
    assert!(pipeline.email.sent().is_empty());
    assert!(pipeline.chat.posts().is_empty());

    let mut bad = reading(1000.0, 5.5);
    bad.set(Channel::WaterTemp, 35.0);
    let outcome = pipeline.measure(bad).await;

    let report = assert_matches!(outcome, CycleOutcome::Dispatched(report) => report);
    assert!(report.is_complete_success(), "{report:?}");
    assert_eq!(report.delivered(), 3);
    assert_eq!(
        report.outcome(ChannelKind::Sms, "alice").unwrap().gateway.as_deref(),
        Some("tmomail.net")
    );

    let email = pipeline.email.sent_to("alice@example.com");
    assert_eq!(email.len(), 1);
    assert_eq!(email[0].subject, EMAIL_SUBJECT);
    assert_eq!(
        email[0].body,
        "The following issues were detected:\n\n\
         TDS is out of range: 1000 (safe range: 0-700)\n\
         pH is out of range: 5.5 (safe range: 6-8)\n\
         water_temp is out of range: 35 (safe range: 20-30)"
    );

    // SMS keeps only the first two lines
    let sms = pipeline.email.sent_to("5551234567@tmomail.net");
    assert_eq!(sms.len(), 1);
    assert_eq!(sms[0].subject, SMS_SUBJECT);
    assert_eq!(
        sms[0].body,
        "Aquaponics Alert:\n\
         TDS is out of range: 1000 (safe range: 0-700)\n\
         pH is out of range: 5.5 (safe range: 6-8)"
    );

    assert_eq!(pipeline.chat.posts().len(), 1);
    assert!(pipeline.chat.posts()[0].contains("water_temp is out of range: 35"));

    pipeline.supervisor.stop().await;
}

#[tokio::test]
async fn test_healthy_readings_send_nothing() {
    let mut pipeline = seeded_pipeline().await;
    pipeline.start().await;

    assert_eq!(pipeline.measure(reading(350.0, 7.0)).await, CycleOutcome::AllClear);
    assert_eq!(pipeline.measure(reading(420.0, 6.8)).await, CycleOutcome::AllClear);

    let status = pipeline.coordinator().status().await.unwrap();
    assert_eq!(status.state, CoordinatorState::Armed);
    assert_eq!(status.processed, 2);
    assert!(pipeline.email.sent().is_empty());
    assert!(pipeline.chat.posts().is_empty());

    pipeline.supervisor.stop().await;
}

#[tokio::test]
async fn test_unavailable_values_are_not_alerted() {
    let mut pipeline = seeded_pipeline().await;
    pipeline.start().await;

    pipeline.measure(reading(350.0, 7.0)).await;

    let reading = reading(350.0, 7.0).with_unavailable(Channel::Ph);
    assert_eq!(pipeline.measure(reading).await, CycleOutcome::AllClear);

    pipeline.supervisor.stop().await;
}

#[tokio::test]
async fn test_mute_holds_back_alerts_until_unmuted() {
    let mut pipeline = seeded_pipeline().await;
    pipeline.start().await;
    pipeline.measure(reading(350.0, 7.0)).await;

    let coordinator = pipeline.coordinator();
    coordinator.mute(None).await.unwrap();
    assert!(coordinator.status().await.unwrap().muted);

    assert_eq!(
        pipeline.measure(reading(900.0, 7.0)).await,
        CycleOutcome::Muted { alerts: 1 }
    );
    assert!(pipeline.email.sent().is_empty());

    coordinator.unmute().await.unwrap();
    assert_matches!(
        pipeline.measure(reading(900.0, 7.0)).await,
        CycleOutcome::Dispatched(_)
    );
    assert_eq!(pipeline.email.sent_to("alice@example.com").len(), 1);

    pipeline.supervisor.stop().await;
}

#[tokio::test]
async fn test_recorder_stores_every_published_reading() {
    let mut pipeline = seeded_pipeline().await;
    pipeline.start().await;

    pipeline.measure(reading(350.0, 7.0)).await;
    pipeline.measure(reading(360.0, 7.1)).await;
    pipeline.measure(reading(370.0, 7.2)).await;

    let stats = pipeline.supervisor.recorder().unwrap().flush().await.unwrap();
    assert_eq!(stats.received, 3);
    assert_eq!(stats.stored, 3);
    assert_eq!(stats.pending, 0);

    let rows = pipeline.storage.readings.latest(10).await.unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|row| row.producer == "sensor-array"));
    assert_eq!(
        rows.iter()
            .map(|row| row.reading.value(Channel::Tds))
            .collect::<Vec<_>>(),
        vec![Some(350.0), Some(360.0), Some(370.0)]
    );

    pipeline.supervisor.stop().await;
}

#[tokio::test]
async fn test_stop_flushes_pending_readings() {
    let mut pipeline = seeded_pipeline().await;
    pipeline.start().await;

    pipeline.measure(reading(350.0, 7.0)).await;
    pipeline.supervisor.stop().await;

    let rows = pipeline.storage.readings.latest(10).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn test_reference_reading_reaches_every_recipient() {
    let mut pipeline = TestPipeline::new(StorageBundle::memory(), RecordingEmail::default());
    pipeline.tolerate(Channel::Tds, Some(0.0), Some(700.0)).await;
    pipeline.tolerate(Channel::AirTemp, Some(10.0), Some(30.0)).await;
    for (id, address) in [("alice", "alice@example.com"), ("bob", "bob@example.com")] {
        pipeline
            .storage
            .settings
            .upsert_recipient(RecipientRecord::new(id).with_email(address))
            .await
            .unwrap();
    }
    pipeline.start().await;

    let tank = |tds: f64, air_temp: f64| {
        Reading::new(0)
            .with(Channel::Tds, tds)
            .with(Channel::AirTemp, air_temp)
            .with(Channel::Ph, 7.0)
            .with(Channel::WaterTemp, 25.0)
            .with(Channel::Humidity, 80.0)
            .with(Channel::Distance, 50.0)
    };

    assert_eq!(pipeline.measure(tank(400.0, 22.0)).await, CycleOutcome::AllClear);
    assert_eq!(pipeline.measure(tank(420.0, 23.0)).await, CycleOutcome::AllClear);

    let outcome = pipeline.measure(tank(1000.0, 35.0)).await;
    let report = assert_matches!(outcome, CycleOutcome::Dispatched(report) => report);
    assert!(report.is_complete_success(), "{report:?}");
    assert!(report.outcome(ChannelKind::Email, "alice").unwrap().is_delivered());
    assert!(report.outcome(ChannelKind::Email, "bob").unwrap().is_delivered());

    let expected = "The following issues were detected:\n\n\
                    TDS is out of range: 1000 (safe range: 0-700)\n\
                    air_temp is out of range: 35 (safe range: 10-30)";
    for address in ["alice@example.com", "bob@example.com"] {
        let sent = pipeline.email.sent_to(address);
        assert_eq!(sent.len(), 1, "{address}");
        assert_eq!(sent[0].subject, EMAIL_SUBJECT);
        assert_eq!(sent[0].body, expected);
    }

    let posts = pipeline.chat.posts();
    assert_eq!(posts.len(), 1);
    assert!(posts[0].contains("TDS is out of range: 1000 (safe range: 0-700)"));
    assert!(posts[0].contains("air_temp is out of range: 35 (safe range: 10-30)"));

    pipeline.supervisor.stop().await;
}

#[tokio::test]
async fn test_cleared_tolerance_stops_alerts() {
    let mut pipeline = seeded_pipeline().await;
    pipeline.start().await;
    pipeline.measure(reading(350.0, 7.0)).await;

    assert_matches!(
        pipeline.measure(reading(900.0, 7.0)).await,
        CycleOutcome::Dispatched(_)
    );

    assert!(
        pipeline
            .storage
            .settings
            .remove_tolerance(Channel::Tds)
            .await
            .unwrap()
    );
    assert_eq!(pipeline.measure(reading(900.0, 7.0)).await, CycleOutcome::AllClear);
    assert_eq!(pipeline.email.sent_to("alice@example.com").len(), 1);

    pipeline.supervisor.stop().await;
}
