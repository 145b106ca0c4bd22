//! In-memory storage backend (no persistence)
//!
//! Used for `storage: none` and in tests. Readings live in a ring buffer;
//! tolerances and recipients are plain maps.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{HealthStatus, ReadingStore, RecipientDirectory, SettingsStore, ToleranceSource};
use super::error::StorageResult;
use super::schema::{ReadingRow, RecipientRecord};
use crate::Channel;
use crate::notification::{ChannelKind, Recipient};
use crate::tolerance::{ToleranceSpec, Tolerances};

/// Maximum readings kept in memory
const MAX_READINGS: usize = 10_000;

/// In-memory storage backend
pub struct MemoryBackend {
    readings: RwLock<VecDeque<ReadingRow>>,
    tolerances: RwLock<Tolerances>,
    recipients: RwLock<BTreeMap<String, RecipientRecord>>,
    capacity: usize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_capacity(MAX_READINGS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            readings: RwLock::new(VecDeque::new()),
            tolerances: RwLock::new(Tolerances::new()),
            recipients: RwLock::new(BTreeMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub async fn reading_count(&self) -> usize {
        self.readings.read().await.len()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReadingStore for MemoryBackend {
    async fn append(&self, row: ReadingRow) -> StorageResult<()> {
        let mut readings = self.readings.write().await;
        readings.push_back(row);
        while readings.len() > self.capacity {
            readings.pop_front();
        }
        Ok(())
    }

    async fn latest(&self, limit: usize) -> StorageResult<Vec<ReadingRow>> {
        let readings = self.readings.read().await;
        let skip = readings.len().saturating_sub(limit);
        Ok(readings.iter().skip(skip).cloned().collect())
    }

    async fn query_range(&self, start: i64, end: i64) -> StorageResult<Vec<ReadingRow>> {
        let readings = self.readings.read().await;
        Ok(readings
            .iter()
            .filter(|row| row.timestamp() >= start && row.timestamp() <= end)
            .cloned()
            .collect())
    }

    async fn cleanup_before(&self, before: i64) -> StorageResult<usize> {
        let mut readings = self.readings.write().await;
        let count = readings.len();
        readings.retain(|row| row.timestamp() >= before);
        let deleted = count - readings.len();
        debug!("removed {deleted} readings from memory");
        Ok(deleted)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                (
                    "readings".to_string(),
                    self.readings.read().await.len().to_string(),
                ),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}

#[async_trait]
impl ToleranceSource for MemoryBackend {
    async fn fetch_all(&self) -> StorageResult<Tolerances> {
        Ok(self.tolerances.read().await.clone())
    }
}

#[async_trait]
impl RecipientDirectory for MemoryBackend {
    async fn fetch_opted_in(&self, kind: ChannelKind) -> StorageResult<Vec<Recipient>> {
        let recipients = self.recipients.read().await;
        Ok(recipients
            .values()
            .filter_map(|record| record.recipient_for(kind))
            .collect())
    }
}

#[async_trait]
impl SettingsStore for MemoryBackend {
    async fn set_tolerance(&self, channel: Channel, spec: ToleranceSpec) -> StorageResult<()> {
        self.tolerances.write().await.insert(channel, spec);
        Ok(())
    }

    async fn remove_tolerance(&self, channel: Channel) -> StorageResult<bool> {
        Ok(self.tolerances.write().await.remove(&channel).is_some())
    }

    async fn upsert_recipient(&self, record: RecipientRecord) -> StorageResult<()> {
        self.recipients
            .write()
            .await
            .insert(record.id.clone(), record);
        Ok(())
    }
}
