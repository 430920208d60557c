//! Error types for storage operations

use std::fmt;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations
///
/// Backends map their native errors onto these two classes. The flush
/// scheduler keeps buffered deltas for `Unavailable` and drops them for
/// `Corruption`.
#[derive(Debug)]
pub enum StorageError {
    /// Transient failure: connection loss, timeout, lock contention.
    /// Retried by the next scheduled cycle.
    Unavailable(String),

    /// Non-retryable failure: undecodable or inconsistent stored data,
    /// rejected writes. Surfaced to the operator.
    Corruption(String),
}

impl StorageError {
    pub fn timed_out(operation: &str) -> Self {
        StorageError::Unavailable(format!("{operation} timed out"))
    }

    /// Whether the failed operation may succeed on a later cycle
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Unavailable(msg) => write!(f, "storage unavailable: {}", msg),
            StorageError::Corruption(msg) => write!(f, "storage corruption: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Unavailable(err.to_string())
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Tls(_) => StorageError::Unavailable(err.to_string()),
            // a concurrent writer created the row first; the next cycle
            // finds it and takes the update path
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StorageError::Unavailable(err.to_string())
            }
            sqlx::Error::Database(ref db) if is_busy(db.message()) => {
                StorageError::Unavailable(err.to_string())
            }
            _ => StorageError::Corruption(err.to_string()),
        }
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::migrate::MigrateError> for StorageError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StorageError::Corruption(format!("migration failed: {}", err))
    }
}

#[cfg(feature = "storage-sqlite")]
fn is_busy(message: &str) -> bool {
    message.contains("database is locked") || message.contains("database is busy")
}
