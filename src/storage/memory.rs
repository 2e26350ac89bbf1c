//! In-memory storage backend (no persistence)
//!
//! Metrics live in a sharded concurrent map keyed by `(name, kind)`.
//! Durability across restarts comes from the snapshot manager, not from this
//! backend.
//!
//! Every update runs read-merge-write under the shard lock for its key, so
//! readers never see a partially applied update and concurrent counter
//! increments are never lost. No operation awaits I/O.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, trace};

use super::backend::Store;
use super::error::{StorageResult, StoreError};
use crate::metric::{Metric, MetricKey, MetricKind, MetricValue, Snapshot, validate_update};

/// In-memory storage backend
pub struct MemoryStore {
    metrics: DashMap<MetricKey, MetricValue>,
}

impl MemoryStore {
    /// Create a new, empty in-memory store
    pub fn new() -> Self {
        Self {
            metrics: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn update(&self, name: &str, value: MetricValue) -> StorageResult<()> {
        validate_update(name, value)?;
        trace!("in-memory update {name} ({}) with {value}", value.kind());

        match self.metrics.entry(MetricKey::new(name, value.kind())) {
            Entry::Occupied(mut entry) => {
                let merged = entry.get().merge(name, value)?;
                entry.insert(merged);
            }
            Entry::Vacant(entry) => {
                entry.insert(value);
            }
        }

        Ok(())
    }

    async fn get(&self, name: &str, kind: MetricKind) -> StorageResult<Metric> {
        let value = self
            .metrics
            .get(&MetricKey::new(name, kind))
            .map(|entry| *entry.value())
            .ok_or_else(|| StoreError::not_found(name, kind))?;

        if value.kind() != kind {
            return Err(StoreError::TypeMismatch {
                name: name.to_string(),
                expected: kind,
                found: value.kind(),
            });
        }

        Metric::new(name, value)
    }

    async fn get_all(&self) -> StorageResult<Snapshot> {
        let mut snapshot = Snapshot::new();
        for entry in self.metrics.iter() {
            snapshot.insert(entry.key().name.clone(), *entry.value());
        }
        trace!("in-memory snapshot with {} metrics", snapshot.len());
        Ok(snapshot)
    }

    async fn set_all(&self, snapshot: Snapshot) -> StorageResult<()> {
        debug!("loading {} metrics into in-memory store", snapshot.len());
        for (key, value) in snapshot.iter() {
            validate_update(&key.name, *value)?;
        }
        for metric in snapshot.into_metrics() {
            self.metrics.insert(metric.key(), metric.value());
        }
        Ok(())
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory store (no-op)");
        Ok(())
    }
}
