//! Property-based tests for invariants using proptest
//!
//! These tests verify that certain properties hold true for all inputs:
//! - Observation order does not change the aggregate
//! - Counter merge is associative
//! - Every call lands in exactly one latency bucket
//! - History deletes cover exactly their bucket range

use apm_collector::aggregator::{MetricAggregator, ServiceReferenceEvent};
use apm_collector::storage::PersistenceDao;
use apm_collector::storage::memory::MemoryBackend;
use apm_collector::storage::schema::{MetricCounters, MetricIdentity, ServiceReferenceMetric};
use apm_collector::util::{MINUTE_BUCKET_MILLIS, bucket_start_millis, minute_time_bucket};
use proptest::prelude::*;

fn event(offset_ms: i64, duration: i64, is_error: bool) -> ServiceReferenceEvent {
    ServiceReferenceEvent {
        entry_service_id: 10,
        front_service_id: 20,
        behind_service_id: 30,
        timestamp: 42 * MINUTE_BUCKET_MILLIS + offset_ms,
        duration,
        is_error,
    }
}

fn call() -> impl Strategy<Value = (i64, i64, bool)> {
    (0i64..MINUTE_BUCKET_MILLIS, 0i64..20_000, any::<bool>())
}

fn counters() -> impl Strategy<Value = MetricCounters> {
    prop::collection::vec((0u64..10_000, any::<bool>()), 0..20).prop_map(|calls| {
        let mut counters = MetricCounters::default();
        for (duration, is_error) in calls {
            counters.record(duration, is_error);
        }
        counters
    })
}

// Property: observe(e1); observe(e2) == observe(e2); observe(e1)
proptest! {
    #[test]
    fn prop_observe_is_order_independent(calls in prop::collection::vec(call(), 1..40)) {
        let forward = MetricAggregator::new(4);
        for (offset, duration, is_error) in &calls {
            forward.observe(&event(*offset, *duration, *is_error)).unwrap();
        }

        let backward = MetricAggregator::new(1);
        for (offset, duration, is_error) in calls.iter().rev() {
            backward.observe(&event(*offset, *duration, *is_error)).unwrap();
        }

        let id = event(0, 0, false).identity().unwrap().id();
        prop_assert_eq!(forward.get(&id), backward.get(&id));
    }
}

// Property: (a + b) + c == a + (b + c)
proptest! {
    #[test]
    fn prop_merge_is_associative(a in counters(), b in counters(), c in counters()) {
        let mut left = a;
        left.merge(&b);
        left.merge(&c);

        let mut right_tail = b;
        right_tail.merge(&c);
        let mut right = a;
        right.merge(&right_tail);

        prop_assert_eq!(left, right);
    }
}

// Property: counts, error counts and cost sums add up; buckets sum to N
proptest! {
    #[test]
    fn prop_counters_account_for_every_call(calls in prop::collection::vec(call(), 1..60)) {
        let aggregator = MetricAggregator::default();
        for (offset, duration, is_error) in &calls {
            aggregator.observe(&event(*offset, *duration, *is_error)).unwrap();
        }

        let drained = aggregator.drain();
        prop_assert_eq!(drained.len(), 1);
        let counters = drained[0].counters;

        prop_assert_eq!(counters.calls, calls.len() as u64);
        prop_assert_eq!(
            counters.errors,
            calls.iter().filter(|(_, _, is_error)| *is_error).count() as u64
        );
        prop_assert_eq!(
            counters.cost_sum,
            calls.iter().map(|(_, duration, _)| *duration as u64).sum::<u64>()
        );
        prop_assert_eq!(counters.latency.iter().sum::<u64>(), calls.len() as u64);
    }
}

// Property: restoring a drained generation loses nothing
proptest! {
    #[test]
    fn prop_drain_then_restore_is_identity(calls in prop::collection::vec(call(), 1..30)) {
        let aggregator = MetricAggregator::new(3);
        for (offset, duration, is_error) in &calls {
            aggregator.observe(&event(*offset, *duration, *is_error)).unwrap();
        }
        let id = event(0, 0, false).identity().unwrap().id();
        let before = aggregator.get(&id);

        let drained = aggregator.drain();
        prop_assert!(aggregator.is_empty());
        aggregator.restore(drained);

        prop_assert_eq!(aggregator.get(&id), before);
    }
}

// Property: delete_history(t0, t1) removes exactly [bucket(t0), bucket(t1)]
proptest! {
    #[test]
    fn prop_delete_history_respects_bucket_range(
        buckets in prop::collection::btree_set(0i64..200, 1..40),
        start_bucket in 0i64..200,
        span in 0i64..100,
        start_offset in 0i64..MINUTE_BUCKET_MILLIS,
        end_offset in 0i64..MINUTE_BUCKET_MILLIS,
    ) {
        let end_bucket = start_bucket + span;
        let start = bucket_start_millis(start_bucket) + start_offset;
        let end = bucket_start_millis(end_bucket) + end_offset;
        prop_assert_eq!(minute_time_bucket(start), start_bucket);
        prop_assert_eq!(minute_time_bucket(end), end_bucket);

        let backend = MemoryBackend::new();
        let rows: Vec<_> = buckets
            .iter()
            .map(|bucket| {
                backend.prepare_insert(&ServiceReferenceMetric::new(
                    MetricIdentity {
                        entry_service_id: 1,
                        front_service_id: 2,
                        behind_service_id: 3,
                        time_bucket: *bucket,
                    },
                    MetricCounters::single(1, false),
                ))
            })
            .collect();

        let deleted = tokio_test::block_on(async {
            backend.batch_insert(rows).await.unwrap();
            backend.delete_history(start, end).await.unwrap()
        });

        let in_range = |bucket: &i64| (start_bucket..=end_bucket).contains(bucket);
        prop_assert_eq!(deleted, buckets.iter().filter(|b| in_range(b)).count() as u64);

        let remaining: Vec<i64> = backend.rows().iter().map(|row| row.time_bucket()).collect();
        prop_assert!(remaining.iter().all(|bucket| !in_range(bucket)));
        prop_assert_eq!(remaining.len(), buckets.iter().filter(|b| !in_range(b)).count());
    }
}
