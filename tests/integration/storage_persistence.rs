//! Integration tests for SQLite persistence
//!
//! These tests verify that:
//! - Flushed aggregates land in the SQLite table
//! - Later cycles update the stored rows
//! - Data survives closing and reopening the database
//! - Retention removes only buckets older than the cutoff

use std::sync::Arc;

use apm_collector::aggregator::MetricAggregator;
use apm_collector::config::FlushConfig;
use apm_collector::flush::FlushScheduler;
use apm_collector::storage::sqlite::SqliteBackend;
use apm_collector::storage::{MetricPersistence, PersistenceDao, StorageBackend};
use tempfile::tempdir;

use crate::helpers::{MINUTE, call, manual_flush_config};

fn sqlite_scheduler(
    aggregator: &Arc<MetricAggregator>,
    backend: &Arc<SqliteBackend>,
    config: &FlushConfig,
) -> FlushScheduler {
    let persistence: Arc<dyn MetricPersistence> = backend.clone();
    FlushScheduler::new(Arc::clone(aggregator), persistence, config)
}

#[tokio::test]
async fn test_flush_into_sqlite() {
    let temp_dir = tempdir().unwrap();
    let backend = Arc::new(
        SqliteBackend::new(temp_dir.path().join("metrics.db"))
            .await
            .unwrap(),
    );
    let aggregator = Arc::new(MetricAggregator::default());
    let scheduler = sqlite_scheduler(&aggregator, &backend, &manual_flush_config());

    aggregator.observe(&call(7 * MINUTE, 500, false)).unwrap();
    aggregator.observe(&call(7 * MINUTE + 10, 2_000, true)).unwrap();
    let first = scheduler.flush().await;
    assert_eq!(first.inserted, 1);

    aggregator.observe(&call(7 * MINUTE + 20, 6_000, false)).unwrap();
    let second = scheduler.flush().await;
    assert_eq!(second.updated, 1);

    let row = backend.get("7_10_20_30").await.unwrap().unwrap();
    assert_eq!(row.counters.calls, 3);
    assert_eq!(row.counters.errors, 1);
    assert_eq!(row.counters.latency, [1, 1, 0, 1]);
    assert_eq!(row.counters.cost_sum, 8_500);
}

#[tokio::test]
async fn test_rows_survive_reopen() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("metrics.db");

    {
        let backend = Arc::new(SqliteBackend::new(&db_path).await.unwrap());
        let aggregator = Arc::new(MetricAggregator::default());
        let scheduler = sqlite_scheduler(&aggregator, &backend, &manual_flush_config());

        aggregator.observe(&call(3 * MINUTE, 1_500, false)).unwrap();
        scheduler.flush().await;
        backend.close().await.unwrap();
    }

    let reopened = Arc::new(SqliteBackend::new(&db_path).await.unwrap());
    let row = reopened.get("3_10_20_30").await.unwrap().unwrap();
    assert_eq!(row.counters.calls, 1);
    assert_eq!(row.counters.latency, [0, 1, 0, 0]);

    // a fresh buffer for the same minute adds to the stored row
    let aggregator = Arc::new(MetricAggregator::default());
    let scheduler = sqlite_scheduler(&aggregator, &reopened, &manual_flush_config());
    aggregator.observe(&call(3 * MINUTE + 5, 100, true)).unwrap();
    let report = scheduler.flush().await;
    assert_eq!(report.updated, 1);

    let row = reopened.get("3_10_20_30").await.unwrap().unwrap();
    assert_eq!(row.counters.calls, 2);
    assert_eq!(row.counters.errors, 1);
}

#[tokio::test]
async fn test_retention_purges_old_buckets() {
    let temp_dir = tempdir().unwrap();
    let backend = Arc::new(
        SqliteBackend::new(temp_dir.path().join("metrics.db"))
            .await
            .unwrap(),
    );
    let aggregator = Arc::new(MetricAggregator::default());
    let config = FlushConfig {
        retention_minutes: 10,
        ..manual_flush_config()
    };
    let scheduler = sqlite_scheduler(&aggregator, &backend, &config);

    for bucket in [1, 2, 89, 90, 100] {
        aggregator.observe(&call(bucket * MINUTE, 10, false)).unwrap();
    }
    assert_eq!(scheduler.flush().await.inserted, 5);

    // cutoff falls inside bucket 90, which is kept
    let deleted = scheduler
        .run_retention(100 * MINUTE + 30_000)
        .await
        .unwrap();
    assert_eq!(deleted, 3);

    assert!(backend.get("89_10_20_30").await.unwrap().is_none());
    assert!(backend.get("90_10_20_30").await.unwrap().is_some());
    assert!(backend.get("100_10_20_30").await.unwrap().is_some());

    let stats = scheduler.stats();
    assert_eq!(stats.rows_deleted, 3);
    assert!(stats.last_retention.is_some());

    let health = backend.health_check().await.unwrap();
    assert!(health.healthy);
}
