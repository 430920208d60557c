//! End-to-end flush scenarios
//!
//! These tests verify that:
//! - Buffered calls reach storage with the expected counters
//! - Flushing in several cycles equals flushing once
//! - Trace segments flow through the registry-bound services into storage

use std::sync::Arc;

use apm_collector::agent_stream::trace::{SegmentReference, TraceSegment};
use apm_collector::aggregator::MetricAggregator;
use apm_collector::storage::PersistenceDao;
use pretty_assertions::assert_eq;

use crate::helpers::{MINUTE, call, memory_collector, memory_scheduler};

const ID: &str = "7_10_20_30";

#[tokio::test]
async fn test_three_calls_in_one_minute() {
    let aggregator = Arc::new(MetricAggregator::default());
    let (backend, scheduler) = memory_scheduler(&aggregator);

    aggregator.observe(&call(7 * MINUTE + 1_000, 500, false)).unwrap();
    aggregator.observe(&call(7 * MINUTE + 20_000, 2_000, true)).unwrap();
    aggregator.observe(&call(7 * MINUTE + 59_999, 6_000, false)).unwrap();

    let report = scheduler.flush().await;
    assert_eq!(report.inserted, 1);

    let row = backend.get(ID).await.unwrap().unwrap();
    assert_eq!(row.counters.calls, 3);
    assert_eq!(row.counters.errors, 1);
    assert_eq!(row.counters.latency, [1, 1, 0, 1]);
    assert_eq!(row.counters.cost_sum, 8_500);
    assert_eq!(row.identity.time_bucket, 7);
}

#[tokio::test]
async fn test_two_cycles_equal_one_cycle() {
    let calls: Vec<_> = (0..8)
        .map(|i| call(7 * MINUTE + i * 1_000, 700 * i, i % 3 == 0))
        .collect();

    // 3 + 5 over two cycles
    let split = Arc::new(MetricAggregator::default());
    let (split_backend, split_scheduler) = memory_scheduler(&split);
    for event in &calls[..3] {
        split.observe(event).unwrap();
    }
    let first = split_scheduler.flush().await;
    for event in &calls[3..] {
        split.observe(event).unwrap();
    }
    let second = split_scheduler.flush().await;

    assert_eq!(first.inserted, 1);
    assert_eq!(second.updated, 1);

    // all 8 at once
    let whole = Arc::new(MetricAggregator::default());
    let (whole_backend, whole_scheduler) = memory_scheduler(&whole);
    for event in &calls {
        whole.observe(event).unwrap();
    }
    whole_scheduler.flush().await;

    let split_row = split_backend.get(ID).await.unwrap().unwrap();
    let whole_row = whole_backend.get(ID).await.unwrap().unwrap();
    assert_eq!(split_row.counters.calls, 8);
    assert_eq!(split_row, whole_row);
}

#[tokio::test]
async fn test_distinct_minutes_become_distinct_rows() {
    let aggregator = Arc::new(MetricAggregator::default());
    let (backend, scheduler) = memory_scheduler(&aggregator);

    aggregator.observe(&call(7 * MINUTE, 10, false)).unwrap();
    aggregator.observe(&call(8 * MINUTE, 10, false)).unwrap();
    scheduler.flush().await;

    let ids: Vec<String> = backend.rows().into_iter().map(|row| row.id).collect();
    assert_eq!(ids, vec!["7_10_20_30".to_string(), "8_10_20_30".to_string()]);
}

#[tokio::test]
async fn test_segments_reach_storage_through_collector() {
    let (backend, collector) = memory_collector();
    let segments = collector.segments().unwrap();

    let reference = |start: i64, end: i64, is_error: bool| SegmentReference {
        entry_service_id: 10,
        front_service_id: 20,
        behind_service_id: 30,
        start_time: start,
        end_time: end,
        is_error,
    };

    let recorded = segments
        .send(&TraceSegment {
            segment_id: "segment-1".to_string(),
            application_id: 1,
            instance_id: 1,
            references: vec![
                reference(7 * MINUTE, 7 * MINUTE + 500, false),
                reference(7 * MINUTE + 100, 7 * MINUTE + 2_100, true),
                reference(7 * MINUTE + 200, 7 * MINUTE + 6_200, false),
            ],
        })
        .unwrap();
    assert_eq!(recorded, 3);

    let report = collector.scheduler().flush().await.unwrap();
    assert_eq!(report.inserted, 1);

    let row = backend.get(ID).await.unwrap().unwrap();
    assert_eq!(row.counters.latency, [1, 1, 0, 1]);
    assert_eq!(row.counters.cost_sum, 8_500);

    let stats = collector.scheduler().get_stats().await.unwrap();
    assert_eq!(stats.inserted_total, 1);
    assert_eq!(stats.buffered_ids, 0);

    collector.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_persists_buffered_calls() {
    let (backend, collector) = memory_collector();

    collector.aggregator().observe(&call(7 * MINUTE, 100, false)).unwrap();
    collector.aggregator().observe(&call(9 * MINUTE, 100, false)).unwrap();

    let report = collector.shutdown().await.unwrap();

    assert_eq!(report.inserted, 2);
    assert_eq!(backend.len(), 2);
}
