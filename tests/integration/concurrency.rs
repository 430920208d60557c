//! Concurrency tests
//!
//! These tests verify that:
//! - Calls observed while flushes run are never lost nor double counted
//! - Concurrent flush requests are serialized

use std::sync::Arc;
use std::time::Duration;

use apm_collector::aggregator::MetricAggregator;
use apm_collector::storage::PersistenceDao;

use crate::helpers::{MINUTE, call, memory_collector, memory_scheduler};

const PRODUCERS: i64 = 8;
const CALLS_PER_PRODUCER: i64 = 500;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_observe_during_flushes_loses_nothing() {
    let (backend, collector) = memory_collector();
    let aggregator = Arc::clone(collector.aggregator());

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let aggregator = Arc::clone(&aggregator);
            tokio::spawn(async move {
                for i in 0..CALLS_PER_PRODUCER {
                    // two minutes, so both insert and update paths run
                    let timestamp = (3 + i % 2) * MINUTE + producer;
                    aggregator.observe(&call(timestamp, i, i % 10 == 0)).unwrap();
                    if i % 50 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        })
        .collect();

    let flusher = {
        let handle = collector.scheduler().clone();
        tokio::spawn(async move {
            for _ in 0..20 {
                handle.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };

    for producer in producers {
        producer.await.unwrap();
    }
    flusher.await.unwrap();
    collector.shutdown().await.unwrap();

    let total: u64 = backend.rows().iter().map(|row| row.counters.calls).sum();
    assert_eq!(total, (PRODUCERS * CALLS_PER_PRODUCER) as u64);
    assert_eq!(backend.len(), 2);

    let errors: u64 = backend.rows().iter().map(|row| row.counters.errors).sum();
    assert_eq!(errors, (PRODUCERS * CALLS_PER_PRODUCER / 10) as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_flushes_are_serialized() {
    let aggregator = Arc::new(MetricAggregator::new(4));
    let (backend, scheduler) = memory_scheduler(&aggregator);
    let scheduler = Arc::new(scheduler);

    let mut flushes = Vec::new();
    for round in 0..10 {
        aggregator.observe(&call(5 * MINUTE, round, false)).unwrap();
        let scheduler = Arc::clone(&scheduler);
        flushes.push(tokio::spawn(async move { scheduler.flush().await }));
    }
    for flush in flushes {
        flush.await.unwrap();
    }
    scheduler.flush().await;

    let row = backend.get("5_10_20_30").await.unwrap().unwrap();
    assert_eq!(row.counters.calls, 10);
    assert_eq!(row.counters.cost_sum, (0..10).sum::<i64>() as u64);
}
