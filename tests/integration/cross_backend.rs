//! Integration tests comparing the two backends
//!
//! The same sequence of updates must leave both stores holding the same
//! mapping, and snapshots must move freely between them.

use assert_matches::assert_matches;
use metric_keeper::{MetricKind, MetricValue, StoreError};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use crate::helpers::{apply, memory_store, sample_updates, sqlite_store};

#[tokio::test]
async fn test_backends_agree_on_final_mapping() {
    let dir = tempdir().unwrap();
    let memory = memory_store();
    let sqlite = sqlite_store(dir.path()).await;

    apply(memory.as_ref(), &sample_updates()).await;
    apply(sqlite.as_ref(), &sample_updates()).await;

    let expected = memory.get_all().await.unwrap();
    assert_eq!(sqlite.get_all().await.unwrap(), expected);
    assert_eq!(
        expected.get("poll_count", MetricKind::Counter),
        Some(MetricValue::Counter(-3))
    );
    assert_eq!(
        expected.get("alloc", MetricKind::Gauge),
        Some(MetricValue::Gauge(2048.5))
    );

    sqlite.close().await.unwrap();
}

#[tokio::test]
async fn test_set_all_moves_state_between_backends() {
    let dir = tempdir().unwrap();
    let memory = memory_store();
    let sqlite = sqlite_store(dir.path()).await;

    apply(memory.as_ref(), &sample_updates()).await;
    sqlite.set_all(memory.get_all().await.unwrap()).await.unwrap();

    // loading twice replaces rather than sums
    sqlite.set_all(memory.get_all().await.unwrap()).await.unwrap();

    assert_eq!(sqlite.get_all().await.unwrap(), memory.get_all().await.unwrap());
    sqlite.close().await.unwrap();
}

#[tokio::test]
async fn test_backends_agree_on_rejected_updates() {
    let dir = tempdir().unwrap();
    let memory = memory_store();
    let sqlite = sqlite_store(dir.path()).await;

    for store in [&memory, &sqlite] {
        store.update("hits", MetricValue::Counter(i64::MAX - 1)).await.unwrap();
        store.update("hits", MetricValue::Counter(1)).await.unwrap();
        assert_matches!(
            store.update("hits", MetricValue::Counter(1)).await,
            Err(StoreError::CounterOverflow { .. })
        );

        store.update("temp", MetricValue::Gauge(4.5)).await.unwrap();
        assert_matches!(
            store.update("temp", MetricValue::Gauge(f64::NAN)).await,
            Err(StoreError::InvalidMetric(_))
        );
    }

    let expected = memory.get_all().await.unwrap();
    assert_eq!(sqlite.get_all().await.unwrap(), expected);
    assert_eq!(
        expected.get("hits", MetricKind::Counter),
        Some(MetricValue::Counter(i64::MAX))
    );

    sqlite.close().await.unwrap();
}
