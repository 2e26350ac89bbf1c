//! Integration tests for failure handling
//!
//! These tests verify that:
//! - A corrupt snapshot file aborts startup instead of being ignored
//! - A snapshot location that cannot be written eventually stops the manager
//! - Store errors are reported as typed variants

use std::time::Duration;

use assert_matches::assert_matches;
use metric_keeper::{MetricKind, MetricValue, SnapshotError, SnapshotManager, StoreError};
use tempfile::tempdir;

use crate::helpers::{memory_store, snapshot_config};

#[tokio::test]
async fn test_corrupt_snapshot_aborts_run() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("metrics.json");
    std::fs::write(&path, "[1, 2, 3]").unwrap();

    let store = memory_store();
    let mut manager = SnapshotManager::new(store.clone(), snapshot_config(path));

    let result = manager.run(std::future::pending::<()>()).await;
    assert_matches!(result, Err(SnapshotError::Restore { .. }));
    assert!(store.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unwritable_location_exhausts_budget() {
    let dir = tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "").unwrap();

    let store = memory_store();
    store.update("hits", MetricValue::Counter(1)).await.unwrap();

    let mut config = snapshot_config(blocker.join("metrics.json"));
    config.restore = false;
    config.max_errors = 2;
    let mut manager = SnapshotManager::new(store, config);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        manager.run(std::future::pending::<()>()),
    )
    .await
    .unwrap();

    assert_matches!(result, Err(SnapshotError::ErrorBudgetExhausted { errors: 3 }));
}

#[tokio::test]
async fn test_store_errors_are_typed() {
    let store = memory_store();

    assert_matches!(
        store.get("missing", MetricKind::Gauge).await,
        Err(StoreError::NotFound { .. })
    );
    assert_matches!(
        store.update("", MetricValue::Counter(1)).await,
        Err(StoreError::InvalidMetric(_))
    );

    store.update("temp", MetricValue::Gauge(1.0)).await.unwrap();
    assert_matches!(
        store.get("temp", MetricKind::Counter).await,
        Err(StoreError::NotFound { kind: MetricKind::Counter, .. })
    );
}
