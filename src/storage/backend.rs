//! Store trait definition
//!
//! This module defines the `Store` contract that both the in-process and the
//! relational backend implement.

use async_trait::async_trait;

use super::error::StorageResult;
use crate::metric::{Metric, MetricKind, MetricValue, Snapshot};

/// Capability contract for metric storage
///
/// ## Merge rule
///
/// `update` inserts a missing key. For an existing key, a gauge is replaced
/// and a counter has the incoming delta added to it. Updates to the same key
/// are linearizable: concurrent callers never lose an increment.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync`; synchronization is the store's
/// job, not the caller's. Backends are shared as `Arc<dyn Store>`.
///
/// ## Error Handling
///
/// All failures are returned as `StoreError` values. A store does not log or
/// recover on behalf of its caller.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or merge a value for `name`; the kind comes from the value tag
    async fn update(&self, name: &str, value: MetricValue) -> StorageResult<()>;

    /// Fetch the metric stored under `(name, kind)`
    ///
    /// Fails with `StoreError::NotFound` if it was never written.
    async fn get(&self, name: &str, kind: MetricKind) -> StorageResult<Metric>;

    /// Point-in-time copy of everything stored
    async fn get_all(&self) -> StorageResult<Snapshot>;

    /// Bulk-load a snapshot, replacing the values of the keys it contains
    ///
    /// Used by restore. Entries are stored as-is; counters are not summed
    /// into existing values.
    async fn set_all(&self, snapshot: Snapshot) -> StorageResult<()>;

    /// Verify the backend is reachable
    async fn ping(&self) -> StorageResult<()>;

    /// Release backend resources
    async fn close(&self) -> StorageResult<()>;
}
