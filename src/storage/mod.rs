//! Persistence for readings, tolerances and recipients
//!
//! ## Backends
//!
//! - **SQLite** (default): embedded database file, see [`sqlite::SqliteBackend`]
//! - **In-Memory**: no persistence, for `storage: none` and tests
//!
//! Every backend implements all four traits of [`backend`]; a
//! [`StorageBundle`] hands each pipeline unit the seam it needs.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{SeedConfig, StorageConfig};
use crate::tolerance::ToleranceSpec;

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{HealthStatus, ReadingStore, RecipientDirectory, SettingsStore, ToleranceSource};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use schema::{ReadingRow, RecipientRecord};

/// One backend viewed through each of its traits
#[derive(Clone)]
pub struct StorageBundle {
    pub readings: Arc<dyn ReadingStore>,
    pub tolerances: Arc<dyn ToleranceSource>,
    pub recipients: Arc<dyn RecipientDirectory>,
    pub settings: Arc<dyn SettingsStore>,
}

impl StorageBundle {
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: ReadingStore + ToleranceSource + RecipientDirectory + SettingsStore + 'static,
    {
        Self {
            readings: backend.clone(),
            tolerances: backend.clone(),
            recipients: backend.clone(),
            settings: backend,
        }
    }

    pub fn memory() -> Self {
        Self::from_backend(Arc::new(MemoryBackend::new()))
    }
}

/// Open the configured backend
pub async fn open(config: &StorageConfig) -> StorageResult<StorageBundle> {
    match config {
        StorageConfig::None => {
            info!("using in-memory storage, readings are not persisted");
            Ok(StorageBundle::memory())
        }

        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path, .. } => {
            let backend = sqlite::SqliteBackend::new(path).await?;
            Ok(StorageBundle::from_backend(Arc::new(backend)))
        }

        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => Err(StorageError::InvalidConfig(
            "built without the storage-sqlite feature".to_string(),
        )),
    }
}

/// Write the tolerances and recipients listed in the config file
///
/// Invalid bounds are skipped with a warning. Returns how many tolerances
/// and recipients were written.
pub async fn apply_seed(
    settings: &dyn SettingsStore,
    seed: &SeedConfig,
) -> StorageResult<(usize, usize)> {
    let mut tolerances = 0;
    for (&channel, bounds) in &seed.tolerances {
        match ToleranceSpec::new(bounds.min, bounds.max) {
            Ok(spec) => {
                settings.set_tolerance(channel, spec).await?;
                tolerances += 1;
            }
            Err(e) => warn!("ignoring seeded tolerance for {channel}: {e}"),
        }
    }

    for record in &seed.recipients {
        settings.upsert_recipient(record.clone()).await?;
    }

    if tolerances > 0 || !seed.recipients.is_empty() {
        info!(
            "seeded {tolerances} tolerances and {} recipients",
            seed.recipients.len()
        );
    }

    Ok((tolerances, seed.recipients.len()))
}
