//! Readings recorded through the pipeline survive a SQLite reopen

use std::sync::Arc;

use crate::helpers::*;
use aquaponics_telemetry::{
    Channel,
    actors::messages::CycleOutcome,
    storage::{RecipientRecord, StorageBundle, sqlite::SqliteBackend},
};
use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

async fn sqlite_bundle(dir: &TempDir) -> StorageBundle {
    let backend = SqliteBackend::new(dir.path().join("aquaponics.db"))
        .await
        .unwrap();
    StorageBundle::from_backend(Arc::new(backend))
}

#[tokio::test]
async fn test_recorded_readings_survive_reopen() {
    let dir = TempDir::new().unwrap();

    {
        let mut pipeline = TestPipeline::new(sqlite_bundle(&dir).await, RecordingEmail::default());
        pipeline.tolerate(Channel::Tds, Some(0.0), Some(700.0)).await;
        pipeline.start().await;

        pipeline.measure(reading(350.0, 7.0)).await;
        pipeline
            .measure(reading(410.0, 7.0).with_unavailable(Channel::Ph))
            .await;

        pipeline.supervisor.stop().await;
        pipeline.storage.readings.close().await.unwrap();
    }

    let storage = sqlite_bundle(&dir).await;
    let rows = storage.readings.latest(10).await.unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].reading.value(Channel::Tds), Some(350.0));
    assert_eq!(rows[1].reading.value(Channel::Tds), Some(410.0));

    // "not available" is kept distinct from "not sampled"
    assert!(rows[1].reading.contains(Channel::Ph));
    assert_eq!(rows[1].reading.value(Channel::Ph), None);
    assert!(!rows[1].reading.contains(Channel::Flow));

    let range = storage
        .readings
        .query_range(rows[0].reading.timestamp, rows[0].reading.timestamp)
        .await
        .unwrap();
    assert_eq!(range.len(), 1);
}

#[tokio::test]
async fn test_settings_written_before_start_are_used() {
    let dir = TempDir::new().unwrap();

    {
        let storage = sqlite_bundle(&dir).await;
        storage
            .settings
            .upsert_recipient(RecipientRecord::new("alice").with_email("alice@example.com"))
            .await
            .unwrap();
        storage.readings.close().await.unwrap();
    }

    let mut pipeline = TestPipeline::new(sqlite_bundle(&dir).await, RecordingEmail::default());
    pipeline.tolerate(Channel::Ph, Some(6.0), Some(8.0)).await;
    pipeline.start().await;

    pipeline.measure(reading(350.0, 7.0)).await;
    assert_matches!(
        pipeline.measure(reading(350.0, 9.1)).await,
        CycleOutcome::Dispatched(report) if report.delivered() == 2
    );
    assert_eq!(
        pipeline.email.sent_to("alice@example.com")[0].body,
        "The following issues were detected:\n\npH is out of range: 9.1 (safe range: 6-8)"
    );

    pipeline.supervisor.stop().await;
}
