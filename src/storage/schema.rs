//! Service reference metric rows and their merge rules
//!
//! ## Identity
//!
//! A row is keyed by the (entry, front, behind) service triple plus the
//! minute time bucket. The derived `id` string is used both as the storage
//! row key and as the key of the in-memory aggregation buffer:
//!
//! ```text
//! {time_bucket}_{entry_service_id}_{front_service_id}_{behind_service_id}
//! ```
//!
//! ## Counters
//!
//! All counters are non-negative and merge by field-wise addition, which
//! makes the merge commutative and associative. Latency buckets are
//! disjoint: every call lands in exactly one of them.

use serde::{Deserialize, Serialize};

/// Table holding service reference metrics
pub const TABLE: &str = "service_reference_metric";

pub const COLUMN_ID: &str = "id";
pub const COLUMN_ENTRY_SERVICE_ID: &str = "entry_service_id";
pub const COLUMN_FRONT_SERVICE_ID: &str = "front_service_id";
pub const COLUMN_BEHIND_SERVICE_ID: &str = "behind_service_id";
pub const COLUMN_LATENCY_LE_1S: &str = "latency_le_1s";
pub const COLUMN_LATENCY_LE_3S: &str = "latency_le_3s";
pub const COLUMN_LATENCY_LE_5S: &str = "latency_le_5s";
pub const COLUMN_LATENCY_GT_5S: &str = "latency_gt_5s";
pub const COLUMN_CALLS: &str = "calls";
pub const COLUMN_ERRORS: &str = "errors";
pub const COLUMN_COST_SUM: &str = "cost_sum";
pub const COLUMN_TIME_BUCKET: &str = "time_bucket";

/// Upper bounds (inclusive, milliseconds) of the fixed latency buckets.
/// Durations above the last threshold fall into the overflow bucket.
pub const LATENCY_THRESHOLDS_MS: [u64; 3] = [1_000, 3_000, 5_000];

/// Number of latency buckets, including the overflow bucket
pub const LATENCY_BUCKETS: usize = LATENCY_THRESHOLDS_MS.len() + 1;

/// Latency bucket a single call falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyBucket {
    /// duration <= 1s
    LeOneSecond,
    /// 1s < duration <= 3s
    LeThreeSeconds,
    /// 3s < duration <= 5s
    LeFiveSeconds,
    /// duration > 5s
    GtFiveSeconds,
}

impl LatencyBucket {
    pub const ALL: [LatencyBucket; LATENCY_BUCKETS] = [
        LatencyBucket::LeOneSecond,
        LatencyBucket::LeThreeSeconds,
        LatencyBucket::LeFiveSeconds,
        LatencyBucket::GtFiveSeconds,
    ];

    /// Pick the first bucket whose threshold the duration does not exceed
    pub fn classify(duration_ms: u64) -> Self {
        let index = LATENCY_THRESHOLDS_MS
            .iter()
            .position(|threshold| duration_ms <= *threshold)
            .unwrap_or(LATENCY_THRESHOLDS_MS.len());
        Self::ALL[index]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Per-bucket counts of a single call in this bucket
    pub fn one_hot(self) -> [u64; LATENCY_BUCKETS] {
        let mut latency = [0; LATENCY_BUCKETS];
        latency[self.index()] = 1;
        latency
    }

    pub fn column(self) -> &'static str {
        match self {
            LatencyBucket::LeOneSecond => COLUMN_LATENCY_LE_1S,
            LatencyBucket::LeThreeSeconds => COLUMN_LATENCY_LE_3S,
            LatencyBucket::LeFiveSeconds => COLUMN_LATENCY_LE_5S,
            LatencyBucket::GtFiveSeconds => COLUMN_LATENCY_GT_5S,
        }
    }
}

/// Aggregation grain of a service reference metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricIdentity {
    pub entry_service_id: i32,
    pub front_service_id: i32,
    pub behind_service_id: i32,
    /// Minute bucket, see [`crate::util::minute_time_bucket`]
    pub time_bucket: i64,
}

impl MetricIdentity {
    /// Deterministic row / buffer key for this identity
    pub fn id(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.time_bucket, self.entry_service_id, self.front_service_id, self.behind_service_id
        )
    }
}

/// Accumulated counters of one identity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricCounters {
    /// Overall number of calls
    pub calls: u64,

    /// Number of calls flagged as errors
    pub errors: u64,

    /// Sum of call durations in milliseconds
    pub cost_sum: u64,

    /// Disjoint per-bucket call counts, indexed by [`LatencyBucket::index`]
    pub latency: [u64; LATENCY_BUCKETS],
}

impl MetricCounters {
    /// Counters of a single observed call
    pub fn single(duration_ms: u64, is_error: bool) -> Self {
        let mut counters = Self::default();
        counters.record(duration_ms, is_error);
        counters
    }

    /// Fold one call into the counters
    pub fn record(&mut self, duration_ms: u64, is_error: bool) {
        self.merge(&MetricCounters {
            calls: 1,
            errors: u64::from(is_error),
            cost_sum: duration_ms,
            latency: LatencyBucket::classify(duration_ms).one_hot(),
        });
    }

    /// Field-wise addition of another counter set
    ///
    /// Every field saturates at `u64::MAX`, so a merge never panics and
    /// never leaves a partially updated counter set behind.
    pub fn merge(&mut self, other: &MetricCounters) {
        self.calls = self.calls.saturating_add(other.calls);
        self.errors = self.errors.saturating_add(other.errors);
        self.cost_sum = self.cost_sum.saturating_add(other.cost_sum);
        for (mine, theirs) in self.latency.iter_mut().zip(other.latency.iter()) {
            *mine = mine.saturating_add(*theirs);
        }
    }

    pub fn bucket(&self, bucket: LatencyBucket) -> u64 {
        self.latency[bucket.index()]
    }
}

/// A service reference metric row
///
/// This is the unit of aggregation: the buffered delta in the aggregator,
/// the stored row in a backend, and the merged totals written back on
/// update all share this shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceReferenceMetric {
    /// Derived from `identity`, kept alongside to avoid re-formatting
    pub id: String,
    pub identity: MetricIdentity,
    pub counters: MetricCounters,
}

impl ServiceReferenceMetric {
    pub fn new(identity: MetricIdentity, counters: MetricCounters) -> Self {
        Self {
            id: identity.id(),
            identity,
            counters,
        }
    }

    /// Merge another row of the same identity into this one
    pub fn merge(&mut self, other: &ServiceReferenceMetric) {
        debug_assert_eq!(self.id, other.id, "merging rows of different identities");
        self.counters.merge(&other.counters);
    }

    /// Return a copy of this row with `other`'s counters added
    pub fn merged_with(&self, other: &ServiceReferenceMetric) -> Self {
        let mut merged = self.clone();
        merged.merge(other);
        merged
    }

    pub fn time_bucket(&self) -> i64 {
        self.identity.time_bucket
    }
}
