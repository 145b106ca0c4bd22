//! SQLite storage backend implementation
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers are not blocked while the recorder writes
//! - **Migrations**: Schema versioning with `sqlx::migrate!`

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, ReadingStore, RecipientDirectory, SettingsStore, ToleranceSource};
use super::error::{StorageError, StorageResult};
use super::schema::{ReadingRow, RecipientRecord};
use crate::Channel;
use crate::notification::{ChannelKind, Recipient};
use crate::tolerance::{ToleranceSpec, Tolerances};

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Open (or create) the database file and run migrations
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connect(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn reading_from_row(row: &SqliteRow) -> StorageResult<ReadingRow> {
        let values_json: String = row.try_get("values_json")?;
        ReadingRow::from_parts(
            row.try_get("producer")?,
            row.try_get("timestamp")?,
            row.try_get("recorded_at")?,
            &values_json,
        )
    }

    fn readings_from_rows(rows: &[SqliteRow]) -> StorageResult<Vec<ReadingRow>> {
        rows.iter().map(Self::reading_from_row).collect()
    }
}

#[async_trait]
impl ReadingStore for SqliteBackend {
    async fn append(&self, row: ReadingRow) -> StorageResult<()> {
        self.append_batch(vec![row]).await
    }

    #[instrument(skip(self, rows), fields(count = rows.len()))]
    async fn append_batch(&self, rows: Vec<ReadingRow>) -> StorageResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO readings (producer, timestamp, recorded_at, values_json)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (producer, timestamp) DO UPDATE SET
                    recorded_at = excluded.recorded_at,
                    values_json = excluded.values_json
                "#,
            )
            .bind(&row.producer)
            .bind(row.timestamp())
            .bind(row.recorded_at.timestamp_millis())
            .bind(row.values_json()?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!("batch insert complete");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn latest(&self, limit: usize) -> StorageResult<Vec<ReadingRow>> {
        let rows = sqlx::query(
            r#"
            SELECT producer, timestamp, recorded_at, values_json
            FROM readings
            ORDER BY timestamp DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut readings = Self::readings_from_rows(&rows)?;
        readings.reverse();
        Ok(readings)
    }

    #[instrument(skip(self))]
    async fn query_range(&self, start: i64, end: i64) -> StorageResult<Vec<ReadingRow>> {
        let rows = sqlx::query(
            r#"
            SELECT producer, timestamp, recorded_at, values_json
            FROM readings
            WHERE timestamp >= ? AND timestamp <= ?
            ORDER BY timestamp ASC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        let readings = Self::readings_from_rows(&rows)?;
        debug!("query returned {} readings", readings.len());
        Ok(readings)
    }

    #[instrument(skip(self))]
    async fn cleanup_before(&self, before: i64) -> StorageResult<usize> {
        let result = sqlx::query("DELETE FROM readings WHERE timestamp < ?")
            .bind(before)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() as usize;
        info!("deleted {} old readings", deleted);
        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => Ok(HealthStatus {
                healthy: true,
                message: "SQLite backend operational".to_string(),
                metadata: HashMap::from([
                    ("backend".to_string(), "sqlite".to_string()),
                    ("db_path".to_string(), self.db_path.clone()),
                ]),
            }),
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}

#[async_trait]
impl ToleranceSource for SqliteBackend {
    #[instrument(skip(self))]
    async fn fetch_all(&self) -> StorageResult<Tolerances> {
        let rows = sqlx::query("SELECT channel, min_value, max_value FROM tolerances")
            .fetch_all(&self.pool)
            .await?;

        let mut tolerances = Tolerances::new();
        for row in rows {
            let name: String = row.try_get("channel")?;
            let Ok(channel) = name.parse::<Channel>() else {
                warn!("ignoring tolerance for unknown channel `{name}`");
                continue;
            };

            match ToleranceSpec::new(row.try_get("min_value")?, row.try_get("max_value")?) {
                Ok(spec) => {
                    tolerances.insert(channel, spec);
                }
                Err(e) => warn!("ignoring tolerance for {channel}: {e}"),
            }
        }

        Ok(tolerances)
    }
}

#[async_trait]
impl RecipientDirectory for SqliteBackend {
    #[instrument(skip(self))]
    async fn fetch_opted_in(&self, kind: ChannelKind) -> StorageResult<Vec<Recipient>> {
        let rows = sqlx::query(
            r#"
            SELECT id, email, phone, carrier, email_notifications, sms_notifications
            FROM recipients
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut recipients = Vec::new();
        for row in rows {
            let record = RecipientRecord {
                id: row.try_get("id")?,
                email: row.try_get("email")?,
                phone: row.try_get("phone")?,
                carrier: row.try_get("carrier")?,
                email_notifications: row.try_get("email_notifications")?,
                sms_notifications: row.try_get("sms_notifications")?,
            };
            recipients.extend(record.recipient_for(kind));
        }

        Ok(recipients)
    }
}

#[async_trait]
impl SettingsStore for SqliteBackend {
    #[instrument(skip(self))]
    async fn set_tolerance(&self, channel: Channel, spec: ToleranceSpec) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tolerances (channel, min_value, max_value, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (channel) DO UPDATE SET
                min_value = excluded.min_value,
                max_value = excluded.max_value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(channel.as_str())
        .bind(spec.min())
        .bind(spec.max())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove_tolerance(&self, channel: Channel) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM tolerances WHERE channel = ?")
            .bind(channel.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, record), fields(id = %record.id))]
    async fn upsert_recipient(&self, record: RecipientRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO recipients (id, email, phone, carrier, email_notifications, sms_notifications)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                email = excluded.email,
                phone = excluded.phone,
                carrier = excluded.carrier,
                email_notifications = excluded.email_notifications,
                sms_notifications = excluded.sms_notifications
            "#,
        )
        .bind(&record.id)
        .bind(&record.email)
        .bind(&record.phone)
        .bind(&record.carrier)
        .bind(record.email_notifications)
        .bind(record.sms_notifications)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
