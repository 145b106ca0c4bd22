//! Degraded operation: storage outages, unit failures and delivery errors

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::helpers::*;
use aquaponics_telemetry::{
    Channel,
    actors::messages::{CoordinatorState, CycleOutcome},
    notification::ChannelKind,
    storage::{RecipientRecord, StorageBundle, StorageError, StorageResult, ToleranceSource},
    supervisor::{Supervisor, UnitKind},
    tolerance::Tolerances,
};
use assert_matches::assert_matches;
use async_trait::async_trait;
use pretty_assertions::assert_eq;

/// Tolerance source that can be switched off
struct Switchable {
    inner: Arc<dyn ToleranceSource>,
    online: AtomicBool,
}

#[async_trait]
impl ToleranceSource for Switchable {
    async fn fetch_all(&self) -> StorageResult<Tolerances> {
        if self.online.load(Ordering::SeqCst) {
            self.inner.fetch_all().await
        } else {
            Err(StorageError::Unavailable("database is locked".to_string()))
        }
    }
}

async fn add_recipients(storage: &StorageBundle) {
    for record in [
        RecipientRecord::new("alice").with_email("alice@example.com"),
        RecipientRecord::new("bob").with_email("bob@example.com"),
    ] {
        storage.settings.upsert_recipient(record).await.unwrap();
    }
}

async fn started(storage: StorageBundle, email: RecordingEmail) -> TestPipeline {
    add_recipients(&storage).await;

    let mut pipeline = TestPipeline::new(storage, email);
    pipeline.tolerate(Channel::Tds, Some(0.0), Some(700.0)).await;
    pipeline.start().await;
    pipeline
}

async fn restart_until(supervisor: &mut Supervisor, kind: UnitKind, restarts: u32) {
    for _ in 0..400 {
        supervisor.check_units().await;
        if supervisor.restarts(kind) >= restarts {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("{kind} was not restarted");
}

#[tokio::test]
async fn test_tolerance_outage_keeps_coordinator_priming() {
    let memory = StorageBundle::memory();
    let switchable = Arc::new(Switchable {
        inner: memory.tolerances.clone(),
        online: AtomicBool::new(false),
    });
    let storage = StorageBundle {
        tolerances: switchable.clone(),
        ..memory
    };

    let mut pipeline = started(storage, RecordingEmail::default()).await;

    let outcome = pipeline.measure(reading(1000.0, 7.0)).await;
    assert_matches!(outcome, CycleOutcome::Aborted(reason) if reason.contains("database is locked"));
    assert_eq!(
        pipeline.coordinator().status().await.unwrap().state,
        CoordinatorState::Priming
    );

    // the first reading evaluated after the outage is still treated as the first
    switchable.online.store(true, Ordering::SeqCst);
    assert_eq!(
        pipeline.measure(reading(1000.0, 7.0)).await,
        CycleOutcome::Suppressed { alerts: 1 }
    );
    assert_matches!(
        pipeline.measure(reading(1000.0, 7.0)).await,
        CycleOutcome::Dispatched(_)
    );

    pipeline.supervisor.stop().await;
}

#[tokio::test]
async fn test_no_tolerances_means_nothing_to_check() {
    let storage = StorageBundle::memory();
    add_recipients(&storage).await;

    let mut pipeline = TestPipeline::new(storage, RecordingEmail::default());
    pipeline.start().await;

    assert_eq!(
        pipeline.measure(reading(5000.0, 1.0)).await,
        CycleOutcome::NothingToCheck
    );
    assert_eq!(
        pipeline.coordinator().status().await.unwrap().state,
        CoordinatorState::Priming
    );
    assert!(pipeline.email.sent().is_empty());

    pipeline.supervisor.stop().await;
}

#[tokio::test]
async fn test_failed_recipient_does_not_block_the_rest() {
    let mut pipeline = started(
        StorageBundle::memory(),
        RecordingEmail::failing(&["alice@example.com"]),
    )
    .await;

    pipeline.measure(reading(350.0, 7.0)).await;
    let outcome = pipeline.measure(reading(1000.0, 7.0)).await;

    let report = assert_matches!(outcome, CycleOutcome::Dispatched(report) => report);
    assert_eq!(report.delivered(), 2);
    assert_eq!(report.failed(), 1);
    assert!(!report.outcome(ChannelKind::Email, "alice").unwrap().is_delivered());
    assert!(report.outcome(ChannelKind::Email, "bob").unwrap().is_delivered());
    assert_eq!(pipeline.email.sent_to("bob@example.com").len(), 1);

    pipeline.supervisor.stop().await;
}

#[tokio::test]
async fn test_dispatcher_restart_restores_delivery() {
    let mut pipeline = started(StorageBundle::memory(), RecordingEmail::default()).await;
    pipeline.measure(reading(350.0, 7.0)).await;

    pipeline
        .supervisor
        .dispatcher()
        .unwrap()
        .shutdown()
        .await
        .unwrap();

    assert_eq!(
        pipeline.measure(reading(1000.0, 7.0)).await,
        CycleOutcome::NoDispatcher { alerts: 1 }
    );
    assert!(pipeline.email.sent().is_empty());

    restart_until(&mut pipeline.supervisor, UnitKind::Dispatcher, 1).await;
    assert!(pipeline.supervisor.is_running(UnitKind::Dispatcher));

    // the coordinator picks up the new dispatcher without a restart
    assert_matches!(
        pipeline.measure(reading(1000.0, 7.0)).await,
        CycleOutcome::Dispatched(_)
    );
    assert_eq!(pipeline.supervisor.restarts(UnitKind::Coordinator), 0);
    assert_eq!(pipeline.email.sent().len(), 2);

    pipeline.supervisor.stop().await;
}

#[tokio::test]
async fn test_restarted_coordinator_primes_again() {
    let mut pipeline = started(StorageBundle::memory(), RecordingEmail::default()).await;
    pipeline.measure(reading(350.0, 7.0)).await;

    pipeline.coordinator().shutdown().await.unwrap();
    restart_until(&mut pipeline.supervisor, UnitKind::Coordinator, 1).await;
    wait_for_subscribers(&pipeline.supervisor, 2).await;

    // fresh incarnation: the first out-of-range reading is held back
    assert_eq!(
        pipeline.measure(reading(1000.0, 7.0)).await,
        CycleOutcome::Suppressed { alerts: 1 }
    );
    assert!(pipeline.email.sent().is_empty());

    pipeline.supervisor.stop().await;
}
