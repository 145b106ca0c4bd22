//! Storage error type

use std::fmt;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug)]
pub enum StorageError {
    /// The database file could not be opened
    Connect(String),

    Migration(String),

    Query(String),

    /// Channel values could not be encoded to or decoded from JSON
    Encoding(String),

    Io(std::io::Error),

    /// The backend is closed or temporarily unable to serve requests
    Unavailable(String),

    /// The configured backend is not compiled in
    InvalidConfig(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Connect(msg) => write!(f, "cannot open reading store: {msg}"),
            StorageError::Migration(msg) => write!(f, "schema migration failed: {msg}"),
            StorageError::Query(msg) => write!(f, "storage query failed: {msg}"),
            StorageError::Encoding(msg) => write!(f, "malformed reading values: {msg}"),
            StorageError::Io(err) => write!(f, "storage I/O error: {err}"),
            StorageError::Unavailable(msg) => write!(f, "storage unavailable: {msg}"),
            StorageError::InvalidConfig(msg) => write!(f, "invalid storage configuration: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        if let StorageError::Io(err) = self {
            Some(err)
        } else {
            None
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Encoding(err.to_string())
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(err) => StorageError::Io(err),
            sqlx::Error::PoolClosed => StorageError::Unavailable("database closed".to_string()),
            other => StorageError::Query(other.to_string()),
        }
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::migrate::MigrateError> for StorageError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StorageError::Migration(err.to_string())
    }
}
