//! Storage backends for metric values
//!
//! This module provides a trait-based abstraction over the place where
//! gauges and counters live, so the rest of the system does not care which
//! backend is configured.
//!
//! ## Design
//!
//! - **Trait-based**: the `Store` trait allows swapping implementations
//! - **Async**: all operations are async for compatibility with Tokio tasks
//! - **Keyed by `(name, kind)`**: a gauge and a counter may share a name
//!
//! ## Backends
//!
//! - **In-Memory**: concurrent map, durable only through snapshots
//! - **SQLite**: embedded database, one row per metric (feature `storage-sqlite`)
//!
//! ## Usage
//!
//! ```no_run
//! use metric_keeper::metric::{MetricKind, MetricValue};
//! use metric_keeper::storage::{Store, sqlite::SqliteStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SqliteStore::connect("./metrics.db").await?;
//!     store.update("requests", MetricValue::Counter(1)).await?;
//!     let total = store.get("requests", MetricKind::Counter).await?;
//!     println!("{}", total.value());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::Store;
pub use error::{StorageResult, StoreError};
pub use memory::MemoryStore;
