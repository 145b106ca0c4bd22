//! Helper functions for integration tests

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use aquaponics_telemetry::{
    Channel, Reading,
    actors::coordinator::CoordinatorHandle,
    actors::dispatcher::Transports,
    actors::messages::{CoordinatorStatus, CycleOutcome},
    sensors::{ReadingSource, shared},
    storage::StorageBundle,
    supervisor::{Collaborators, PipelineSettings, Supervisor},
    tolerance::ToleranceSpec,
    transport::{ChatTransport, EmailTransport, TransportError},
};
use async_trait::async_trait;

/// One email accepted by [`RecordingEmail`]
#[derive(Debug, Clone, PartialEq)]
pub struct SentEmail {
    pub address: String,
    pub subject: String,
    pub body: String,
}

/// Email transport that records every message and refuses scripted addresses
#[derive(Default)]
pub struct RecordingEmail {
    sent: Mutex<Vec<SentEmail>>,
    failing: HashSet<String>,
}

impl RecordingEmail {
    pub fn failing(addresses: &[&str]) -> Self {
        Self {
            sent: Mutex::default(),
            failing: addresses.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, address: &str) -> Vec<SentEmail> {
        self.sent()
            .into_iter()
            .filter(|email| email.address == address)
            .collect()
    }
}

#[async_trait]
impl EmailTransport for RecordingEmail {
    async fn send(&self, address: &str, subject: &str, body: &str) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(SentEmail {
            address: address.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });

        if self.failing.contains(address) {
            return Err(TransportError::Smtp("550 no such user".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingChat {
    posts: Mutex<Vec<String>>,
}

impl RecordingChat {
    pub fn posts(&self) -> Vec<String> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatTransport for RecordingChat {
    async fn post(&self, text: &str) -> Result<(), TransportError> {
        self.posts.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// Source replaying scripted channel values with increasing timestamps
pub struct ScriptedSource {
    script: Arc<Mutex<VecDeque<Reading>>>,
    timestamp: i64,
}

impl ScriptedSource {
    pub fn new() -> (Self, Arc<Mutex<VecDeque<Reading>>>) {
        let script = Arc::new(Mutex::new(VecDeque::new()));
        (
            Self {
                script: script.clone(),
                timestamp: 1_700_000_000,
            },
            script,
        )
    }
}

#[async_trait]
impl ReadingSource for ScriptedSource {
    async fn stabilize(&mut self) -> Result<()> {
        Ok(())
    }

    async fn measure(&mut self) -> Result<Reading> {
        let mut reading = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("script exhausted"))?;

        self.timestamp += 900;
        reading.timestamp = self.timestamp;
        Ok(reading)
    }
}

/// A reading with the given TDS and pH values
pub fn reading(tds: f64, ph: f64) -> Reading {
    Reading::new(0)
        .with(Channel::Tds, tds)
        .with(Channel::Ph, ph)
        .with(Channel::WaterTemp, 24.0)
}

/// Settings for tests: no warm-up, no periodic ticks, fast supervision
pub fn test_settings() -> PipelineSettings {
    let mut settings = PipelineSettings::default();
    settings.scheduler.warmup_samples = 0;
    settings.scheduler.interval = Duration::from_secs(24 * 3600);
    settings.dispatcher.sms_pacing = Duration::from_millis(10);
    settings.recorder.retention = None;
    settings.check_interval = Duration::from_millis(20);
    settings.shutdown_timeout = Duration::from_secs(2);
    settings
}

pub struct TestPipeline {
    pub supervisor: Supervisor,
    pub storage: StorageBundle,
    pub script: Arc<Mutex<VecDeque<Reading>>>,
    pub email: Arc<RecordingEmail>,
    pub chat: Arc<RecordingChat>,
}

impl TestPipeline {
    pub fn new(storage: StorageBundle, email: RecordingEmail) -> Self {
        let (source, script) = ScriptedSource::new();
        let email = Arc::new(email);
        let chat = Arc::new(RecordingChat::default());

        let collaborators = Collaborators {
            source: shared(source),
            storage: storage.clone(),
            transports: Transports::new(
                Some(email.clone() as Arc<dyn EmailTransport>),
                Some(chat.clone() as Arc<dyn ChatTransport>),
            ),
        };

        Self {
            supervisor: Supervisor::new(collaborators, test_settings()),
            storage,
            script,
            email,
            chat,
        }
    }

    /// Start every unit and wait until the consumers are subscribed
    pub async fn start(&mut self) {
        self.supervisor.start();
        wait_for_subscribers(&self.supervisor, 2).await;
    }

    pub async fn tolerate(&self, channel: Channel, min: Option<f64>, max: Option<f64>) {
        self.storage
            .settings
            .set_tolerance(channel, ToleranceSpec::new(min, max).unwrap())
            .await
            .unwrap();
    }

    pub fn coordinator(&self) -> CoordinatorHandle {
        self.supervisor.coordinator().unwrap()
    }

    /// Measure the next scripted reading and wait for the coordinator's verdict
    pub async fn measure(&self, reading: Reading) -> CycleOutcome {
        let coordinator = self.coordinator();
        let before = coordinator.status().await.unwrap().processed;

        self.script.lock().unwrap().push_back(reading);
        self.supervisor
            .scheduler()
            .unwrap()
            .measure_now()
            .await
            .unwrap();

        wait_for_processed(&coordinator, before + 1)
            .await
            .last_outcome
            .unwrap()
    }
}

pub async fn wait_for_processed(coordinator: &CoordinatorHandle, count: u64) -> CoordinatorStatus {
    for _ in 0..400 {
        let status = coordinator.status().await.unwrap();
        if status.processed >= count {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("coordinator did not process {count} readings");
}

pub async fn wait_for_subscribers(supervisor: &Supervisor, count: usize) {
    for _ in 0..400 {
        if let Some(relay) = supervisor.relay()
            && let Ok(stats) = relay.stats().await
            && stats.subscribers == count
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("relay never reached {count} subscribers");
}
