//! Integration tests for concurrent access
//!
//! These tests verify that:
//! - Concurrent counter increments are never lost
//! - Readers observe monotonically growing counters while writers run
//! - Snapshots taken while writers run never fail

use std::sync::Arc;

use metric_keeper::{MetricKind, MetricValue, SnapshotManager, Store};
use tempfile::tempdir;

use crate::helpers::{memory_store, snapshot_config};

const WRITERS: usize = 8;
const UPDATES_PER_WRITER: usize = 200;

async fn hammer(store: Arc<dyn Store>) {
    let mut tasks = vec![];
    for writer in 0..WRITERS {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..UPDATES_PER_WRITER {
                store.update("requests", MetricValue::Counter(1)).await.unwrap();
                store
                    .update("last_writer", MetricValue::Gauge((writer * 1000 + i) as f64))
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_memory() {
    let store = memory_store();
    hammer(store.clone()).await;

    let total = store.get("requests", MetricKind::Counter).await.unwrap();
    assert_eq!(
        total.value(),
        MetricValue::Counter((WRITERS * UPDATES_PER_WRITER) as i64)
    );
    assert!(store.get("last_writer", MetricKind::Gauge).await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_see_monotonic_counters() {
    let store = memory_store();
    let writers = tokio::spawn(hammer(store.clone()));

    let mut last = 0;
    while !writers.is_finished() {
        if let Ok(metric) = store.get("requests", MetricKind::Counter).await {
            let current = metric.value().as_counter().unwrap();
            assert!(current >= last, "counter went backwards: {last} -> {current}");
            last = current;
        }
        tokio::task::yield_now().await;
    }
    writers.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_snapshots_during_writes() {
    let dir = tempdir().unwrap();
    let store = memory_store();
    store.update("requests", MetricValue::Counter(0)).await.unwrap();

    let mut manager = SnapshotManager::new(store.clone(), snapshot_config(dir.path().join("m.json")));
    manager.run(hammer(store.clone())).await.unwrap();

    assert_eq!(manager.stats().total_errors, 0);
    assert!(manager.stats().saves >= 1);
}

#[cfg(feature = "storage-sqlite")]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_sqlite() {
    use crate::helpers::sqlite_store;

    let dir = tempdir().unwrap();
    let store = sqlite_store(dir.path()).await;

    let mut tasks = vec![];
    for _ in 0..4 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..50 {
                store.update("requests", MetricValue::Counter(1)).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let total = store.get("requests", MetricKind::Counter).await.unwrap();
    assert_eq!(total.value(), MetricValue::Counter(200));
    store.close().await.unwrap();
}
