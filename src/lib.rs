pub mod config;
pub mod metric;
pub mod retry;
pub mod snapshot;
pub mod storage;

pub use metric::{Metric, MetricKey, MetricKind, MetricValue, Snapshot};
pub use snapshot::{SnapshotError, SnapshotManager, SnapshotStats};
pub use storage::{MemoryStore, StorageResult, Store, StoreError};
