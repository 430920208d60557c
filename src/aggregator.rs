//! In-memory aggregation of service reference observations
//!
//! ## Buffer layout
//!
//! The buffer is partitioned by a hash of the aggregate id into N
//! independently locked shards, so producers observing different ids
//! rarely contend. Each shard holds the deltas accumulated since the last
//! flush.
//!
//! ## Generations
//!
//! [`MetricAggregator::drain`] swaps every shard's map for an empty one
//! under that shard's lock. Observations racing with a drain land either
//! in the drained generation or in the next one, never in neither.
//! Deltas that could not be persisted are merged back with
//! [`MetricAggregator::restore`]; since the merge is commutative this
//! yields the same totals as if they had never left the buffer.

use std::collections::HashMap;
use std::collections::hash_map::{Entry, RandomState};
use std::fmt;
use std::hash::BuildHasher;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::storage::schema::{MetricCounters, MetricIdentity, ServiceReferenceMetric};
use crate::util::minute_time_bucket;

/// Default number of buffer shards
pub const DEFAULT_SHARDS: usize = 16;

/// A single observed call between two services
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceReferenceEvent {
    pub entry_service_id: i32,
    pub front_service_id: i32,
    pub behind_service_id: i32,
    /// Call start, unix milliseconds
    pub timestamp: i64,
    /// Call duration in milliseconds
    pub duration: i64,
    pub is_error: bool,
}

/// Rejection reason for a malformed observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidEvent {
    NegativeDuration(i64),
    NegativeTimestamp(i64),
    /// An identity field still carries the unregistered id `0`
    MissingIdentity(&'static str),
}

impl fmt::Display for InvalidEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidEvent::NegativeDuration(d) => write!(f, "negative duration: {}ms", d),
            InvalidEvent::NegativeTimestamp(ts) => write!(f, "negative timestamp: {}", ts),
            InvalidEvent::MissingIdentity(field) => write!(f, "missing identity field: {}", field),
        }
    }
}

impl std::error::Error for InvalidEvent {}

impl ServiceReferenceEvent {
    /// Validate the event and derive its aggregation identity
    pub fn identity(&self) -> Result<MetricIdentity, InvalidEvent> {
        if self.duration < 0 {
            return Err(InvalidEvent::NegativeDuration(self.duration));
        }
        if self.timestamp < 0 {
            return Err(InvalidEvent::NegativeTimestamp(self.timestamp));
        }
        for (field, value) in [
            ("entry_service_id", self.entry_service_id),
            ("front_service_id", self.front_service_id),
            ("behind_service_id", self.behind_service_id),
        ] {
            if value == 0 {
                return Err(InvalidEvent::MissingIdentity(field));
            }
        }

        Ok(MetricIdentity {
            entry_service_id: self.entry_service_id,
            front_service_id: self.front_service_id,
            behind_service_id: self.behind_service_id,
            time_bucket: minute_time_bucket(self.timestamp),
        })
    }
}

type Shard = Mutex<HashMap<String, ServiceReferenceMetric>>;

/// Sharded aggregation buffer
pub struct MetricAggregator {
    shards: Box<[Shard]>,
    hasher: RandomState,
}

impl MetricAggregator {
    /// Create an aggregator with `shards` independently locked partitions
    pub fn new(shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| Mutex::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            shards,
            hasher: RandomState::new(),
        }
    }

    /// Merge one observation into the buffer
    ///
    /// Never blocks on storage; the only contention is the shard lock.
    pub fn observe(&self, event: &ServiceReferenceEvent) -> Result<(), InvalidEvent> {
        let identity = event.identity()?;
        // identity() rejected negative durations
        let counters = MetricCounters::single(event.duration as u64, event.is_error);
        self.merge(ServiceReferenceMetric::new(identity, counters));
        Ok(())
    }

    /// Take every buffered aggregate, leaving empty shards behind
    pub fn drain(&self) -> Vec<ServiceReferenceMetric> {
        let mut drained = Vec::new();
        for shard in self.shards.iter() {
            let generation = std::mem::take(&mut *lock(shard));
            drained.extend(generation.into_values());
        }
        trace!("drained {} aggregates", drained.len());
        drained
    }

    /// Merge deltas back into the buffer, e.g. after a failed flush
    pub fn restore(&self, deltas: Vec<ServiceReferenceMetric>) {
        trace!("restoring {} aggregates", deltas.len());
        for delta in deltas {
            self.merge(delta);
        }
    }

    /// Current buffered delta for an id
    pub fn get(&self, id: &str) -> Option<ServiceReferenceMetric> {
        lock(self.shard_for(id)).get(id).cloned()
    }

    /// Number of buffered ids
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| lock(shard).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn merge(&self, delta: ServiceReferenceMetric) {
        let mut shard = lock(self.shard_for(&delta.id));
        match shard.entry(delta.id.clone()) {
            Entry::Occupied(mut existing) => existing.get_mut().merge(&delta),
            Entry::Vacant(slot) => {
                slot.insert(delta);
            }
        }
    }

    fn shard_for(&self, id: &str) -> &Shard {
        let index = self.hasher.hash_one(id) as usize % self.shards.len();
        &self.shards[index]
    }
}

impl Default for MetricAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_SHARDS)
    }
}

// Counters stay consistent even if a holder panicked: every mutation
// under the lock is a single merge.
fn lock(shard: &Shard) -> MutexGuard<'_, HashMap<String, ServiceReferenceMetric>> {
    shard.lock().unwrap_or_else(PoisonError::into_inner)
}
