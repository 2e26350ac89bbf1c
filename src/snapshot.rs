//! Snapshot manager - periodic durable dumps of the store
//!
//! ## Lifecycle
//!
//! 1. **Restore** (optional, once): load the snapshot file into the store.
//!    A missing file is an empty snapshot; an unreadable one is fatal.
//! 2. **Steady state**: on every tick, dump the store and replace the file.
//!    Failures are logged; only a run of more than `max_errors` consecutive
//!    write failures stops the loop.
//! 3. **Shutdown**: when the shutdown future resolves, save one last time
//!    (best effort, bounded by `shutdown_timeout`) and return.
//!
//! ## File format
//!
//! A single JSON object keyed by `"<name>_<kind>"`:
//!
//! ```json
//! {
//!   "alloc_gauge": { "id": "alloc", "type": "gauge", "value": 1.5 },
//!   "hits_counter": { "id": "hits", "type": "counter", "delta": 10 }
//! }
//! ```
//!
//! The file is written to a temporary sibling, synced to disk and renamed
//! into place, so a crash or power loss never leaves a truncated snapshot
//! behind.

use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::SnapshotConfig;
use crate::metric::{MetricKey, MetricKind, MetricValue, Snapshot};
use crate::storage::{Store, StoreError};

/// Period used when the configured interval is zero
const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Floats in `[-2^63, 2^63)` truncate into an `i64` without saturating
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// Errors surfaced by the snapshot manager
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The snapshot file exists but could not be read or decoded
    #[error("failed to restore snapshot from {path}: {reason}")]
    Restore { path: PathBuf, reason: String },

    /// Restored data could not be loaded into the store
    #[error("failed to load restored snapshot into the store: {0}")]
    Load(#[source] StoreError),

    /// A single save failed
    #[error("failed to write snapshot to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Too many consecutive save failures
    #[error("giving up after {errors} consecutive snapshot failures")]
    ErrorBudgetExhausted { errors: usize },
}

/// Counters describing the manager's activity
#[derive(Debug, Clone, Default)]
pub struct SnapshotStats {
    /// Snapshots written successfully
    pub saves: u64,

    /// Write failures since the last successful save
    pub consecutive_errors: usize,

    /// Write failures over the manager's lifetime
    pub total_errors: u64,

    /// When the last successful save finished
    pub last_saved: Option<DateTime<Utc>>,
}

/// Drives restore, periodic saves and the shutdown flush
pub struct SnapshotManager {
    store: Arc<dyn Store>,
    config: SnapshotConfig,
    stats: SnapshotStats,
}

impl SnapshotManager {
    pub fn new(store: Arc<dyn Store>, mut config: SnapshotConfig) -> Self {
        if config.interval.is_zero() {
            warn!("snapshot interval is zero, using {:?}", MIN_INTERVAL);
            config.interval = MIN_INTERVAL;
        }

        debug!(
            "creating snapshot manager (path: {}, interval: {:?}, restore: {})",
            config.path.display(),
            config.interval,
            config.restore
        );

        Self {
            store,
            config,
            stats: SnapshotStats::default(),
        }
    }

    pub fn stats(&self) -> &SnapshotStats {
        &self.stats
    }

    /// Load the snapshot file into the store
    ///
    /// Returns the number of restored metrics. A missing file restores
    /// nothing and is not an error.
    #[instrument(skip(self), fields(path = %self.config.path.display()))]
    pub async fn restore(&self) -> Result<usize, SnapshotError> {
        let snapshot = load_snapshot(&self.config.path).await?;
        let count = snapshot.len();

        self.store
            .set_all(snapshot)
            .await
            .map_err(SnapshotError::Load)?;

        info!("restored {} metrics from snapshot", count);
        Ok(count)
    }

    /// Run until `shutdown` resolves or the error budget is exhausted
    ///
    /// `Ok(())` means a requested shutdown; `Err` carries the reason the
    /// manager stopped on its own (restore failure or error budget).
    #[instrument(skip_all)]
    pub async fn run<S>(&mut self, shutdown: S) -> Result<(), SnapshotError>
    where
        S: Future<Output = ()>,
    {
        if self.config.restore {
            self.restore().await?;
        }

        let period = self.config.interval;
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    debug!("shutdown requested");
                    break;
                }

                _ = ticker.tick() => {
                    trace!("snapshot tick");
                    if let Err(e) = self.save().await {
                        warn!("{}", e);
                        if self.stats.consecutive_errors > self.config.max_errors {
                            error!(
                                "snapshot error budget exhausted ({} consecutive failures)",
                                self.stats.consecutive_errors
                            );
                            return Err(SnapshotError::ErrorBudgetExhausted {
                                errors: self.stats.consecutive_errors,
                            });
                        }
                    }
                }
            }
        }

        // Final flush before shutdown
        match time::timeout(self.config.shutdown_timeout, self.save()).await {
            Ok(Ok(())) => debug!("final snapshot written"),
            Ok(Err(e)) => error!("final snapshot failed: {}", e),
            Err(_) => error!(
                "final snapshot did not finish within {:?}",
                self.config.shutdown_timeout
            ),
        }

        debug!("snapshot manager stopped");
        Ok(())
    }

    /// Dump the store and replace the snapshot file
    ///
    /// A failure to read the store is logged and skipped; it does not count
    /// against the error budget. An empty store leaves the file untouched.
    pub async fn save(&mut self) -> Result<(), SnapshotError> {
        let snapshot = match self.store.get_all().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("failed to read metrics for snapshot: {}", e);
                return Ok(());
            }
        };

        if snapshot.is_empty() {
            trace!("store is empty, nothing to save");
            return Ok(());
        }

        match write_snapshot(&self.config.path, &snapshot).await {
            Ok(()) => {
                self.stats.saves += 1;
                self.stats.consecutive_errors = 0;
                self.stats.last_saved = Some(Utc::now());
                trace!(
                    "snapshot #{} written ({} metrics)",
                    self.stats.saves,
                    snapshot.len()
                );
                Ok(())
            }
            Err(e) => {
                self.stats.consecutive_errors += 1;
                self.stats.total_errors += 1;
                Err(e)
            }
        }
    }
}

/// One entry of the snapshot document
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,

    #[serde(rename = "type")]
    kind: MetricKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<Number>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    delta: Option<Number>,
}

/// A JSON number that may have been written as an integer or a float
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    /// Counters written by other producers may carry floats; truncate them
    fn as_i64(self) -> Option<i64> {
        match self {
            Number::Int(i) => Some(i),
            Number::Float(f) if (-I64_BOUND..I64_BOUND).contains(&f) => Some(f.trunc() as i64),
            Number::Float(_) => None,
        }
    }
}

impl SnapshotEntry {
    fn from_metric(key: &MetricKey, value: MetricValue) -> Self {
        let (value, delta) = match value {
            MetricValue::Gauge(v) => (Some(Number::Float(v)), None),
            MetricValue::Counter(d) => (None, Some(Number::Int(d))),
        };

        Self {
            id: Some(key.name.clone()),
            kind: key.kind,
            value,
            delta,
        }
    }

    fn into_metric(self, raw_key: &str) -> Result<(String, MetricValue), String> {
        let name = match self.id {
            Some(id) if !id.is_empty() => id,
            _ => match MetricKey::parse(raw_key) {
                Some(key) if key.kind == self.kind => key.name,
                _ => return Err(format!("cannot derive metric name from key {raw_key:?}")),
            },
        };

        let value = match self.kind {
            MetricKind::Gauge => match self.value {
                Some(v) => MetricValue::Gauge(v.as_f64()),
                None => return Err(format!("gauge {name} has no value")),
            },
            MetricKind::Counter => match self.delta.or(self.value).and_then(Number::as_i64) {
                Some(d) => MetricValue::Counter(d),
                None => return Err(format!("counter {name} has no integral delta")),
            },
        };

        Ok((name, value))
    }
}

/// Read a snapshot file; a missing file yields an empty snapshot
pub async fn load_snapshot(path: &Path) -> Result<Snapshot, SnapshotError> {
    let restore_err = |reason: String| SnapshotError::Restore {
        path: path.to_path_buf(),
        reason,
    };

    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!("no snapshot at {}, starting empty", path.display());
            return Ok(Snapshot::new());
        }
        Err(err) => return Err(restore_err(err.to_string())),
    };

    let document: BTreeMap<String, SnapshotEntry> =
        serde_json::from_slice(&bytes).map_err(|e| restore_err(e.to_string()))?;

    let mut snapshot = Snapshot::new();
    for (raw_key, entry) in document {
        let (name, value) = entry.into_metric(&raw_key).map_err(restore_err)?;
        snapshot.insert(name, value);
    }

    Ok(snapshot)
}

/// Serialize `snapshot` and atomically replace the file at `path`
pub async fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), SnapshotError> {
    let write_err = |source: io::Error| SnapshotError::Write {
        path: path.to_path_buf(),
        source,
    };

    // JSON has no encoding for NaN or infinities
    if let Some((key, _)) = snapshot
        .iter()
        .find(|(_, value)| value.as_gauge().is_some_and(|v| !v.is_finite()))
    {
        return Err(write_err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("gauge {} is not finite", key.name),
        )));
    }

    let document: BTreeMap<String, SnapshotEntry> = snapshot
        .iter()
        .map(|(key, value)| (key.to_string(), SnapshotEntry::from_metric(key, *value)))
        .collect();

    let payload = serde_json::to_vec_pretty(&document).map_err(|e| write_err(e.into()))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension("tmp");
    if let Err(e) = replace_file(&tmp_path, path, &payload).await {
        if let Err(cleanup) = tokio::fs::remove_file(&tmp_path).await {
            trace!("could not remove {}: {}", tmp_path.display(), cleanup);
        }
        return Err(write_err(e));
    }

    Ok(())
}

async fn replace_file(tmp_path: &Path, path: &Path, payload: &[u8]) -> io::Result<()> {
    let mut file = tokio::fs::File::create(tmp_path).await?;
    file.write_all(payload).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(tmp_path, path).await
}
