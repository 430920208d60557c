//! Latest JVM samples per agent instance
//!
//! Sampling happens inside the agents; the collector only keeps the most
//! recent value of each kind and the last time an instance was heard from.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::trace;

use crate::aggregator::InvalidEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GcPhase {
    Young,
    Old,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CpuSample {
    pub timestamp: i64,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GcSample {
    pub timestamp: i64,
    pub phase: GcPhase,
    /// Collections since the previous sample
    pub count: u64,
    /// Milliseconds spent collecting since the previous sample
    pub time_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemorySample {
    pub timestamp: i64,
    pub is_heap: bool,
    pub init: i64,
    pub max: i64,
    pub used: i64,
    pub committed: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryPoolSample {
    pub timestamp: i64,
    /// Pool name as reported by the agent, e.g. `eden` or `metaspace`
    pub pool: String,
    pub init: i64,
    pub max: i64,
    pub used: i64,
    pub committed: i64,
}

pub trait CpuMetricService: Send + Sync {
    fn record_cpu(&self, instance_id: i32, sample: CpuSample) -> Result<(), InvalidEvent>;
}

pub trait GcMetricService: Send + Sync {
    fn record_gc(&self, instance_id: i32, sample: GcSample) -> Result<(), InvalidEvent>;
}

pub trait MemoryMetricService: Send + Sync {
    fn record_memory(&self, instance_id: i32, sample: MemorySample) -> Result<(), InvalidEvent>;
}

pub trait MemoryPoolMetricService: Send + Sync {
    fn record_memory_pool(
        &self,
        instance_id: i32,
        sample: MemoryPoolSample,
    ) -> Result<(), InvalidEvent>;
}

pub trait InstanceHeartBeatService: Send + Sync {
    fn heartbeat(&self, instance_id: i32, timestamp: i64) -> Result<(), InvalidEvent>;
}

/// Everything known about one instance
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InstanceSnapshot {
    pub cpu: Option<CpuSample>,
    pub young_gc: Option<GcSample>,
    pub old_gc: Option<GcSample>,
    pub heap: Option<MemorySample>,
    pub non_heap: Option<MemorySample>,
    pub memory_pools: HashMap<String, MemoryPoolSample>,
    /// Latest heartbeat or sample timestamp
    pub last_seen: i64,
}

/// Keeps the latest samples of every instance in memory
#[derive(Default)]
pub struct JvmMetricRecorder {
    instances: Mutex<HashMap<i32, InstanceSnapshot>>,
}

impl JvmMetricRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, instance_id: i32) -> Option<InstanceSnapshot> {
        self.lock().get(&instance_id).cloned()
    }

    /// Instances not heard from within `threshold_ms` of `now_millis`
    pub fn stale_instances(&self, now_millis: i64, threshold_ms: i64) -> Vec<i32> {
        let mut stale: Vec<i32> = self
            .lock()
            .iter()
            .filter(|(_, snapshot)| now_millis - snapshot.last_seen > threshold_ms)
            .map(|(id, _)| *id)
            .collect();
        stale.sort_unstable();
        stale
    }

    fn update(
        &self,
        instance_id: i32,
        timestamp: i64,
        apply: impl FnOnce(&mut InstanceSnapshot),
    ) -> Result<(), InvalidEvent> {
        if instance_id == 0 {
            return Err(InvalidEvent::MissingIdentity("instance_id"));
        }
        if timestamp < 0 {
            return Err(InvalidEvent::NegativeTimestamp(timestamp));
        }

        let mut instances = self.lock();
        let snapshot = instances.entry(instance_id).or_default();
        apply(snapshot);
        snapshot.last_seen = snapshot.last_seen.max(timestamp);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<i32, InstanceSnapshot>> {
        self.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Replace `slot` unless it already holds a newer sample
fn keep_latest<T>(slot: &mut Option<T>, sample: T, timestamp: impl Fn(&T) -> i64) {
    if slot.as_ref().is_none_or(|current| timestamp(current) <= timestamp(&sample)) {
        *slot = Some(sample);
    }
}

impl CpuMetricService for JvmMetricRecorder {
    fn record_cpu(&self, instance_id: i32, sample: CpuSample) -> Result<(), InvalidEvent> {
        trace!("cpu sample for instance {}", instance_id);
        self.update(instance_id, sample.timestamp, |snapshot| {
            keep_latest(&mut snapshot.cpu, sample, |s| s.timestamp);
        })
    }
}

impl GcMetricService for JvmMetricRecorder {
    fn record_gc(&self, instance_id: i32, sample: GcSample) -> Result<(), InvalidEvent> {
        trace!("{:?} gc sample for instance {}", sample.phase, instance_id);
        self.update(instance_id, sample.timestamp, |snapshot| {
            let slot = match sample.phase {
                GcPhase::Young => &mut snapshot.young_gc,
                GcPhase::Old => &mut snapshot.old_gc,
            };
            keep_latest(slot, sample, |s| s.timestamp);
        })
    }
}

impl MemoryMetricService for JvmMetricRecorder {
    fn record_memory(&self, instance_id: i32, sample: MemorySample) -> Result<(), InvalidEvent> {
        self.update(instance_id, sample.timestamp, |snapshot| {
            let slot = if sample.is_heap {
                &mut snapshot.heap
            } else {
                &mut snapshot.non_heap
            };
            keep_latest(slot, sample, |s| s.timestamp);
        })
    }
}

impl MemoryPoolMetricService for JvmMetricRecorder {
    fn record_memory_pool(
        &self,
        instance_id: i32,
        sample: MemoryPoolSample,
    ) -> Result<(), InvalidEvent> {
        let timestamp = sample.timestamp;
        self.update(instance_id, timestamp, |snapshot| {
            let mut slot = snapshot.memory_pools.remove(&sample.pool);
            let pool = sample.pool.clone();
            keep_latest(&mut slot, sample, |s| s.timestamp);
            if let Some(latest) = slot {
                snapshot.memory_pools.insert(pool, latest);
            }
        })
    }
}

impl InstanceHeartBeatService for JvmMetricRecorder {
    fn heartbeat(&self, instance_id: i32, timestamp: i64) -> Result<(), InvalidEvent> {
        self.update(instance_id, timestamp, |_| {})
    }
}
