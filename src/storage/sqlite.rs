//! SQLite storage backend implementation
//!
//! This module provides a SQLite-based implementation of the `Store` trait.
//!
//! ## Merge semantics
//!
//! Every `update` is a single upsert statement. The accumulate-vs-replace
//! decision is made inside the database, so concurrent writers on different
//! connections (or different processes sharing the file) stay atomic without
//! any client-side locking:
//!
//! - gauges populate `value`, which is replaced on conflict
//! - counters populate `delta`, which is summed on conflict when the existing
//!   row is a counter
//!
//! SQLite silently promotes an overflowing integer sum to REAL, so the
//! conflict update only applies while the sum stays an integer. A skipped
//! update changes no row and is reported as `StoreError::CounterOverflow`.
//!
//! ## Startup
//!
//! Construction opens the pool, applies migrations (already-applied
//! migrations are a no-op) and pings the database before returning.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{Span, debug, info, instrument, warn};

use super::backend::Store;
use super::error::{StorageResult, StoreError};
use crate::metric::{Metric, MetricKey, MetricKind, MetricValue, Snapshot, validate_update};

const UPSERT_MERGE: &str = r#"
    INSERT INTO metrics (name, type, value, delta)
    VALUES (?, ?, ?, ?)
    ON CONFLICT (name, type) DO UPDATE SET
        value = excluded.value,
        delta = CASE
            WHEN metrics.type = 'counter' THEN metrics.delta + excluded.delta
            ELSE excluded.delta
        END
    WHERE metrics.type <> 'counter'
       OR typeof(metrics.delta + excluded.delta) = 'integer'
"#;

const UPSERT_REPLACE: &str = r#"
    INSERT INTO metrics (name, type, value, delta)
    VALUES (?, ?, ?, ?)
    ON CONFLICT (name, type) DO UPDATE SET
        value = excluded.value,
        delta = excluded.delta
"#;

/// Connection settings for the SQLite backend
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    /// Connection string, e.g. `sqlite://metrics.db` or a plain path
    pub dsn: String,

    /// Maximum pooled connections
    pub max_connections: u32,

    /// Upper bound on waiting for a pooled connection
    pub acquire_timeout: Duration,

    /// How long SQLite retries on lock contention
    pub busy_timeout: Duration,
}

impl SqliteOptions {
    pub fn new(dsn: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(30),
        }
    }
}

/// SQLite storage backend
#[derive(Debug)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    dsn: String,

    /// Span that receives diagnostics the store reports without failing,
    /// such as rows skipped during a full scan
    span: Span,
}

impl SqliteStore {
    /// Connect with default pool settings
    ///
    /// Diagnostics are reported inside the caller's current span.
    pub async fn connect(dsn: &str) -> StorageResult<Self> {
        Self::connect_with(SqliteOptions::new(dsn), Span::current()).await
    }

    /// Connect, migrate and verify the database
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Run migrations to create tables
    /// 3. Ping the database before declaring the store ready
    #[instrument(skip_all, fields(dsn = %options.dsn))]
    pub async fn connect_with(options: SqliteOptions, span: Span) -> StorageResult<Self> {
        if options.dsn.trim().is_empty() {
            return Err(StoreError::InvalidConfig(
                "database DSN must not be empty".to_string(),
            ));
        }

        info!("initializing SQLite store at: {}", options.dsn);

        // accepts both `sqlite://` URLs and bare file paths
        let connect_options = SqliteConnectOptions::from_str(&options.dsn)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal) // WAL mode for better concurrency
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(options.busy_timeout); // Retry on lock contention

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.acquire_timeout)
            .connect_with(connect_options)
            .await?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;
        debug!("database migrations complete");

        let store = Self {
            pool,
            dsn: options.dsn,
            span,
        };
        store.ping().await?;

        info!("SQLite store ready");
        Ok(store)
    }

    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    /// Split a value into the `(value, delta)` column pair
    fn columns(value: MetricValue) -> (Option<f64>, Option<i64>) {
        match value {
            MetricValue::Gauge(v) => (Some(v), None),
            MetricValue::Counter(d) => (None, Some(d)),
        }
    }

    /// Rebuild a typed value from the column pair of a row of `kind`
    fn decode_value(
        name: &str,
        kind: MetricKind,
        value: Option<f64>,
        delta: Option<i64>,
    ) -> StorageResult<MetricValue> {
        match (kind, value, delta) {
            (MetricKind::Gauge, Some(v), _) => Ok(MetricValue::Gauge(v)),
            (MetricKind::Counter, _, Some(d)) => Ok(MetricValue::Counter(d)),
            (_, None, None) => Err(StoreError::not_found(name, kind)),
            (MetricKind::Gauge, None, Some(_)) => Err(StoreError::TypeMismatch {
                name: name.to_string(),
                expected: MetricKind::Gauge,
                found: MetricKind::Counter,
            }),
            (MetricKind::Counter, Some(_), None) => Err(StoreError::TypeMismatch {
                name: name.to_string(),
                expected: MetricKind::Counter,
                found: MetricKind::Gauge,
            }),
        }
    }

    fn decode_row(row: &SqliteRow) -> StorageResult<Metric> {
        let name: String = row.try_get("name")?;
        let kind: MetricKind = row.try_get::<String, _>("type")?.parse()?;
        let value: Option<f64> = row.try_get("value")?;
        let delta: Option<i64> = row.try_get("delta")?;

        let value = Self::decode_value(&name, kind, value, delta)
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        Metric::new(name, value)
    }
}

#[async_trait]
impl Store for SqliteStore {
    #[instrument(skip(self), fields(kind = %value.kind()))]
    async fn update(&self, name: &str, value: MetricValue) -> StorageResult<()> {
        validate_update(name, value)?;
        let (gauge, delta) = Self::columns(value);

        let result = sqlx::query(UPSERT_MERGE)
            .bind(name)
            .bind(value.kind().as_str())
            .bind(gauge)
            .bind(delta)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::CounterOverflow {
                name: name.to_string(),
            });
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, name: &str, kind: MetricKind) -> StorageResult<Metric> {
        let row: Option<(Option<f64>, Option<i64>)> =
            sqlx::query_as("SELECT value, delta FROM metrics WHERE name = ? AND type = ?")
                .bind(name)
                .bind(kind.as_str())
                .fetch_optional(&self.pool)
                .await?;

        let (value, delta) = row.ok_or_else(|| StoreError::not_found(name, kind))?;
        let value = Self::decode_value(name, kind, value, delta)?;
        Metric::new(name, value)
    }

    #[instrument(skip(self))]
    async fn get_all(&self) -> StorageResult<Snapshot> {
        let mut rows = sqlx::query("SELECT name, type, value, delta FROM metrics")
            .fetch(&self.pool);

        let mut snapshot = Snapshot::new();
        let mut skipped = 0usize;

        while let Some(row) = rows.try_next().await? {
            match Self::decode_row(&row) {
                Ok(metric) => snapshot.push(metric),
                Err(e) => {
                    skipped += 1;
                    warn!(parent: &self.span, "skipping undecodable metric row: {}", e);
                }
            }
        }

        if skipped > 0 {
            warn!(parent: &self.span, "full scan skipped {} of {} rows", skipped, skipped + snapshot.len());
        }
        debug!("full scan returned {} metrics", snapshot.len());

        Ok(snapshot)
    }

    #[instrument(skip_all, fields(count = snapshot.len()))]
    async fn set_all(&self, snapshot: Snapshot) -> StorageResult<()> {
        if snapshot.is_empty() {
            return Ok(());
        }

        for (key, value) in snapshot.iter() {
            validate_update(&key.name, *value)?;
        }

        let mut tx = self.pool.begin().await?;

        for (MetricKey { name, kind }, value) in snapshot.iter() {
            let (gauge, delta) = Self::columns(*value);
            sqlx::query(UPSERT_REPLACE)
                .bind(name.as_str())
                .bind(kind.as_str())
                .bind(gauge)
                .bind(delta)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        debug!("bulk load complete");
        Ok(())
    }

    async fn ping(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite store");
        self.pool.close().await;
        Ok(())
    }
}
