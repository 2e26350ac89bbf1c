//! Error types for storage operations

use thiserror::Error;

use crate::metric::MetricKind;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StoreError>;

/// Errors that can occur during storage operations
///
/// Callers branch on the variant; the message is supplementary context.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No metric is stored under `(name, kind)`
    #[error("metric {name} ({kind}) not found")]
    NotFound { name: String, kind: MetricKind },

    /// The stored value is tagged with a different kind than requested
    #[error("metric {name}: expected {expected} value, found {found}")]
    TypeMismatch {
        name: String,
        expected: MetricKind,
        found: MetricKind,
    },

    /// Adding the delta would take the counter outside the `i64` range
    #[error("counter {name} would overflow")]
    CounterOverflow { name: String },

    /// The backend is not reachable (yet); retriable during startup
    #[error("storage backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Persisted data could not be decoded
    #[error("failed to decode persisted metric: {0}")]
    Decode(String),

    /// The metric itself is malformed (e.g. empty name)
    #[error("invalid metric: {0}")]
    InvalidMetric(String),

    /// Invalid configuration
    #[error("invalid storage configuration: {0}")]
    InvalidConfig(String),

    /// Database query failed for a non-transient reason
    #[error("storage query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("database migration failed: {0}")]
    MigrationFailed(String),

    /// I/O error (file access, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn not_found(name: &str, kind: MetricKind) -> Self {
        StoreError::NotFound {
            name: name.to_string(),
            kind,
        }
    }

    /// Whether the failure is worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::BackendUnavailable(_))
    }
}

/// SQLite primary result codes treated as transient
#[cfg(feature = "storage-sqlite")]
const SQLITE_BUSY: i32 = 5;
#[cfg(feature = "storage-sqlite")]
const SQLITE_LOCKED: i32 = 6;
#[cfg(feature = "storage-sqlite")]
const SQLITE_CANTOPEN: i32 = 14;

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::BackendUnavailable(err.to_string()),
            sqlx::Error::Database(ref db_err) => {
                // extended result codes carry the primary code in the low byte
                let primary = db_err
                    .code()
                    .and_then(|code| code.parse::<i32>().ok())
                    .map(|code| code & 0xff);
                match primary {
                    Some(SQLITE_BUSY | SQLITE_LOCKED | SQLITE_CANTOPEN) => {
                        StoreError::BackendUnavailable(err.to_string())
                    }
                    _ => StoreError::QueryFailed(err.to_string()),
                }
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::Decode(err.to_string())
            }
            _ => StoreError::QueryFailed(err.to_string()),
        }
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::MigrationFailed(err.to_string())
    }
}
