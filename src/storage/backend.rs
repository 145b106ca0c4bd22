//! Storage traits
//!
//! The pipeline only reads through these seams: readings are appended by the
//! recorder, tolerances and recipients are fetched fresh for every reading.
//! [`SettingsStore`] is the write side used by the command line.

use std::collections::HashMap;

use async_trait::async_trait;

use super::error::StorageResult;
use super::schema::{ReadingRow, RecipientRecord};
use crate::Channel;
use crate::notification::{ChannelKind, Recipient};
use crate::tolerance::{ToleranceSpec, Tolerances};

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Persistent log of readings
///
/// Timestamps are seconds since the Unix epoch, matching
/// [`Reading::timestamp`](crate::Reading::timestamp).
#[async_trait]
pub trait ReadingStore: Send + Sync {
    async fn append(&self, row: ReadingRow) -> StorageResult<()>;

    /// Append several rows. Backends override this to use a transaction.
    async fn append_batch(&self, rows: Vec<ReadingRow>) -> StorageResult<()> {
        for row in rows {
            self.append(row).await?;
        }
        Ok(())
    }

    /// The `limit` most recent rows, oldest first
    async fn latest(&self, limit: usize) -> StorageResult<Vec<ReadingRow>>;

    /// Rows with `start <= timestamp <= end`, oldest first
    async fn query_range(&self, start: i64, end: i64) -> StorageResult<Vec<ReadingRow>>;

    /// Delete rows older than `before`, returning how many were removed
    async fn cleanup_before(&self, before: i64) -> StorageResult<usize>;

    async fn health_check(&self) -> StorageResult<HealthStatus>;

    async fn close(&self) -> StorageResult<()>;
}

/// Source of the per-channel tolerance bounds
#[async_trait]
pub trait ToleranceSource: Send + Sync {
    /// All valid tolerances; empty when none are configured
    async fn fetch_all(&self) -> StorageResult<Tolerances>;
}

/// Source of the people to notify
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn fetch_opted_in(&self, kind: ChannelKind) -> StorageResult<Vec<Recipient>>;
}

/// Management operations used by the command line and config seeding
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn set_tolerance(&self, channel: Channel, spec: ToleranceSpec) -> StorageResult<()>;

    /// Returns whether a tolerance was removed
    async fn remove_tolerance(&self, channel: Channel) -> StorageResult<bool>;

    async fn upsert_recipient(&self, record: RecipientRecord) -> StorageResult<()>;
}
