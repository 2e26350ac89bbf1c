//! Integration tests for snapshot persistence
//!
//! These tests verify that:
//! - A running manager captures updates in the snapshot file
//! - A fresh store restored from that file matches the original
//! - Restored counters keep accumulating from the restored total

use std::time::Duration;

use metric_keeper::snapshot::load_snapshot;
use metric_keeper::{MetricKind, MetricValue, SnapshotManager};
use pretty_assertions::assert_eq;
use tempfile::tempdir;
use tokio::sync::oneshot;

use crate::helpers::{apply, memory_store, sample_updates, snapshot_config};

#[tokio::test]
async fn test_restart_restores_previous_state() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("metrics.json");

    // first run: fill the store, stop, flush
    let first = memory_store();
    apply(first.as_ref(), &sample_updates()).await;
    let mut manager = SnapshotManager::new(first.clone(), snapshot_config(path.clone()));
    manager
        .run(tokio::time::sleep(Duration::from_millis(30)))
        .await
        .unwrap();
    assert!(manager.stats().saves >= 1);

    // second run: a new store is restored from the file
    let second = memory_store();
    let manager = SnapshotManager::new(second.clone(), snapshot_config(path.clone()));
    let restored = manager.restore().await.unwrap();

    assert_eq!(restored, 4);
    assert_eq!(second.get_all().await.unwrap(), first.get_all().await.unwrap());
}

#[tokio::test]
async fn test_counters_continue_after_restore() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("metrics.json");

    let first = memory_store();
    first.update("hits", MetricValue::Counter(40)).await.unwrap();
    let mut manager = SnapshotManager::new(first, snapshot_config(path.clone()));
    manager.save().await.unwrap();

    let second = memory_store();
    let mut manager = SnapshotManager::new(second.clone(), snapshot_config(path.clone()));

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let client = {
        let store = second.clone();
        async move {
            while store.get("hits", MetricKind::Counter).await.is_err() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            store.update("hits", MetricValue::Counter(2)).await.unwrap();
            stop_tx.send(()).unwrap();
        }
    };

    let (result, ()) = tokio::join!(
        manager.run(async {
            let _ = stop_rx.await;
        }),
        client
    );
    result.unwrap();

    let saved = load_snapshot(&path).await.unwrap();
    assert_eq!(saved.get("hits", MetricKind::Counter), Some(MetricValue::Counter(42)));
}

#[cfg(feature = "storage-sqlite")]
#[tokio::test]
async fn test_sqlite_snapshot_restores_into_memory() {
    use crate::helpers::sqlite_store;

    let dir = tempdir().unwrap();
    let path = dir.path().join("metrics.json");

    let sqlite = sqlite_store(dir.path()).await;
    apply(sqlite.as_ref(), &sample_updates()).await;
    let mut manager = SnapshotManager::new(sqlite.clone(), snapshot_config(path.clone()));
    manager.save().await.unwrap();

    let memory = memory_store();
    SnapshotManager::new(memory.clone(), snapshot_config(path))
        .restore()
        .await
        .unwrap();

    assert_eq!(memory.get_all().await.unwrap(), sqlite.get_all().await.unwrap());
    sqlite.close().await.unwrap();
}

#[tokio::test]
async fn test_restore_disabled_ignores_existing_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("metrics.json");

    let first = memory_store();
    first.update("temp", MetricValue::Gauge(9.5)).await.unwrap();
    SnapshotManager::new(first, snapshot_config(path.clone()))
        .save()
        .await
        .unwrap();

    let second = memory_store();
    let mut config = snapshot_config(path);
    config.restore = false;
    let mut manager = SnapshotManager::new(second.clone(), config);
    manager.run(std::future::ready(())).await.unwrap();

    assert!(second.get_all().await.unwrap().is_empty());
}
