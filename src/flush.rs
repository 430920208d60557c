//! Flush and retention cycles
//!
//! A flush cycle drains the aggregator and hands the deltas to the bound
//! [`MetricPersistence`] provider, which runs the get / merge / prepare /
//! submit protocol implemented by [`persist_batch`]:
//!
//! 1. look up every drained id (bounded concurrency, each call bounded by
//!    the storage timeout)
//! 2. ids without a stored row become inserts carrying the delta itself,
//!    ids with a stored row become updates carrying `stored + delta`
//! 3. inserts and updates are submitted as one batch each
//!
//! Deltas that failed for transient reasons go back into the aggregator
//! and are retried by the next cycle. Deltas that hit corrupt storage are
//! dropped and counted.
//!
//! Only one flush runs at a time. A tick that finds a flush in progress is
//! skipped, not queued.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::aggregator::MetricAggregator;
use crate::config::FlushConfig;
use crate::storage::backend::{BatchFailure, MetricPersistence, PersistenceDao};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::schema::ServiceReferenceMetric;
use crate::util::{bucket_start_millis, minute_time_bucket};

/// Point lookups in flight at once during a flush
pub const LOOKUP_CONCURRENCY: usize = 16;

/// Run a storage call, turning an elapsed `timeout` into `Unavailable`
pub async fn bounded<T, F>(timeout: Duration, operation: &str, fut: F) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!("{} exceeded storage timeout of {:?}", operation, timeout);
            Err(StorageError::timed_out(operation))
        }
    }
}

/// Result of persisting one drained batch
#[derive(Debug, Default)]
pub struct PersistOutcome {
    /// Rows created
    pub inserted: usize,

    /// Rows overwritten with merged totals
    pub updated: usize,

    /// Deltas to merge back into the buffer
    pub retry: Vec<ServiceReferenceMetric>,

    /// Ids whose deltas were discarded because of corrupt storage
    pub dropped: Vec<String>,

    /// Most recent storage error of this batch
    pub last_error: Option<StorageError>,

    /// Any operation of this batch failed as unavailable
    saw_unavailable: bool,
}

impl PersistOutcome {
    fn fail(&mut self, delta: ServiceReferenceMetric, error: StorageError) {
        if error.is_retryable() {
            self.saw_unavailable = true;
            self.retry.push(delta);
        } else {
            self.dropped.push(delta.id);
        }
        self.last_error = Some(error);
    }

    /// Sort a batch failure onto the deltas submitted with it. Returns the
    /// number of operations that were applied.
    fn absorb(&mut self, deltas: Vec<ServiceReferenceMetric>, failure: BatchFailure) -> usize {
        let failed: HashSet<usize> = failure
            .failed
            .into_iter()
            .filter(|index| *index < deltas.len())
            .collect();
        let applied = deltas.len() - failed.len();
        let retryable = failure.error.is_retryable();
        self.saw_unavailable |= retryable && !failed.is_empty();

        for (index, delta) in deltas.into_iter().enumerate() {
            if !failed.contains(&index) {
                continue;
            }
            if retryable {
                self.retry.push(delta);
            } else {
                self.dropped.push(delta.id);
            }
        }

        self.last_error = Some(failure.error);
        applied
    }

    /// Whether storage looked unreachable during this batch
    pub fn unavailable(&self) -> bool {
        self.saw_unavailable
    }
}

async fn submit<F>(
    timeout: Duration,
    operation: &str,
    len: usize,
    fut: F,
) -> Result<(), BatchFailure>
where
    F: Future<Output = Result<(), BatchFailure>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!("{} exceeded storage timeout of {:?}", operation, timeout);
            Err(BatchFailure::all(len, StorageError::timed_out(operation)))
        }
    }
}

/// Persist drained deltas through a DAO
///
/// The caller must hold the flush lock: two concurrent runs for the same
/// id would both read the stored row and one merge would be lost.
pub async fn persist_batch<D>(
    dao: &D,
    deltas: Vec<ServiceReferenceMetric>,
    timeout: Duration,
) -> PersistOutcome
where
    D: PersistenceDao + ?Sized,
{
    let mut outcome = PersistOutcome::default();
    if deltas.is_empty() {
        return outcome;
    }

    let lookups: Vec<_> = stream::iter(deltas)
        .map(|delta| async move {
            let stored = bounded(timeout, "get", dao.get(&delta.id)).await;
            (delta, stored)
        })
        .buffer_unordered(LOOKUP_CONCURRENCY)
        .collect()
        .await;

    let mut inserts = Vec::new();
    let mut insert_deltas = Vec::new();
    let mut updates = Vec::new();
    let mut update_deltas = Vec::new();

    for (delta, stored) in lookups {
        match stored {
            Ok(None) => {
                inserts.push(dao.prepare_insert(&delta));
                insert_deltas.push(delta);
            }
            Ok(Some(row)) if row.identity != delta.identity => {
                let error = StorageError::Corruption(format!(
                    "stored row {} has identity {:?}",
                    row.id, row.identity
                ));
                outcome.fail(delta, error);
            }
            Ok(Some(row)) => {
                updates.push(dao.prepare_update(&row.merged_with(&delta)));
                update_deltas.push(delta);
            }
            Err(error) => outcome.fail(delta, error),
        }
    }

    if !inserts.is_empty() {
        let len = inserts.len();
        match submit(timeout, "batch insert", len, dao.batch_insert(inserts)).await {
            Ok(()) => outcome.inserted += len,
            Err(failure) => outcome.inserted += outcome.absorb(insert_deltas, failure),
        }
    }

    if !updates.is_empty() {
        let len = updates.len();
        match submit(timeout, "batch update", len, dao.batch_update(updates)).await {
            Ok(()) => outcome.updated += len,
            Err(failure) => outcome.updated += outcome.absorb(update_deltas, failure),
        }
    }

    outcome
}

/// Summary of one flush cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub drained: usize,
    pub inserted: usize,
    pub updated: usize,
    pub retried: usize,
    pub dropped: usize,
}

/// Flush and retention counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushStats {
    /// Ids currently waiting in the aggregator
    pub buffered_ids: usize,
    pub cycles: u64,
    pub skipped_ticks: u64,
    pub inserted_total: u64,
    pub updated_total: u64,
    pub retried_total: u64,
    pub dropped_total: u64,
    pub last_batch_size: u64,
    pub consecutive_unavailable_cycles: u64,
    pub rows_deleted: u64,
    pub last_retention: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Counters {
    cycles: AtomicU64,
    skipped_ticks: AtomicU64,
    inserted: AtomicU64,
    updated: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
    last_batch_size: AtomicU64,
    consecutive_unavailable: AtomicU64,
    rows_deleted: AtomicU64,
    /// Unix millis of the last successful sweep, `i64::MIN` if none
    last_retention: AtomicI64,
}

/// Drives flush and retention cycles against the bound persistence provider
pub struct FlushScheduler {
    aggregator: Arc<MetricAggregator>,
    persistence: Arc<dyn MetricPersistence>,
    storage_timeout: Duration,
    retention: Duration,
    unavailable_alert_threshold: u64,
    flush_lock: Mutex<()>,
    retention_lock: Mutex<()>,
    counters: Counters,
}

impl FlushScheduler {
    pub fn new(
        aggregator: Arc<MetricAggregator>,
        persistence: Arc<dyn MetricPersistence>,
        config: &FlushConfig,
    ) -> Self {
        let counters = Counters::default();
        counters.last_retention.store(i64::MIN, Ordering::Relaxed);

        Self {
            aggregator,
            persistence,
            storage_timeout: config.storage_timeout(),
            retention: config.retention(),
            unavailable_alert_threshold: config.unavailable_alert_threshold.max(1),
            flush_lock: Mutex::new(()),
            retention_lock: Mutex::new(()),
            counters,
        }
    }

    pub fn aggregator(&self) -> &Arc<MetricAggregator> {
        &self.aggregator
    }

    pub fn persistence(&self) -> &Arc<dyn MetricPersistence> {
        &self.persistence
    }

    /// Flush unless another flush is in progress
    ///
    /// Returns `None` when the tick was skipped.
    pub async fn try_flush(&self) -> Option<FlushReport> {
        let Ok(_guard) = self.flush_lock.try_lock() else {
            self.counters.skipped_ticks.fetch_add(1, Ordering::Relaxed);
            warn!("previous flush still running, skipping tick");
            return None;
        };
        Some(self.flush_locked().await)
    }

    /// Flush, waiting for an in-progress flush to finish first
    pub async fn flush(&self) -> FlushReport {
        let _guard = self.flush_lock.lock().await;
        self.flush_locked().await
    }

    #[instrument(skip(self), name = "flush")]
    async fn flush_locked(&self) -> FlushReport {
        let deltas = self.aggregator.drain();
        let drained = deltas.len();
        self.counters.cycles.fetch_add(1, Ordering::Relaxed);
        self.counters
            .last_batch_size
            .store(drained as u64, Ordering::Relaxed);

        if drained == 0 {
            debug!("nothing buffered");
            self.counters.consecutive_unavailable.store(0, Ordering::Relaxed);
            return FlushReport::default();
        }

        debug!("flushing {} aggregates to {}", drained, self.persistence.name());
        let outcome = self.persistence.persist(deltas, self.storage_timeout).await;

        let report = FlushReport {
            drained,
            inserted: outcome.inserted,
            updated: outcome.updated,
            retried: outcome.retry.len(),
            dropped: outcome.dropped.len(),
        };

        self.counters
            .inserted
            .fetch_add(report.inserted as u64, Ordering::Relaxed);
        self.counters
            .updated
            .fetch_add(report.updated as u64, Ordering::Relaxed);
        self.counters
            .retried
            .fetch_add(report.retried as u64, Ordering::Relaxed);
        self.counters
            .dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);

        if !outcome.dropped.is_empty() {
            error!(
                "dropped {} aggregates after storage corruption: {}",
                outcome.dropped.len(),
                outcome
                    .last_error
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default()
            );
        }

        if outcome.unavailable() {
            let streak = self
                .counters
                .consecutive_unavailable
                .fetch_add(1, Ordering::Relaxed)
                + 1;
            if streak >= self.unavailable_alert_threshold {
                error!(
                    "storage unavailable for {} consecutive flush cycles, {} ids buffered",
                    streak,
                    self.aggregator.len() + outcome.retry.len()
                );
            } else {
                warn!(
                    "storage unavailable, {} aggregates kept for the next cycle",
                    outcome.retry.len()
                );
            }
        } else {
            self.counters.consecutive_unavailable.store(0, Ordering::Relaxed);
        }

        self.aggregator.restore(outcome.retry);

        info!(
            "flush complete: {} inserted, {} updated, {} retried, {} dropped",
            report.inserted, report.updated, report.retried, report.dropped
        );
        report
    }

    /// Retention range for a sweep at `now_millis`
    ///
    /// Covers every bucket that ends before `now - retention`. The bucket
    /// containing the cutoff itself is kept.
    pub fn retention_window(&self, now_millis: i64) -> Option<(i64, i64)> {
        let retention_ms = i64::try_from(self.retention.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_millis.saturating_sub(retention_ms);
        let end = bucket_start_millis(minute_time_bucket(cutoff)) - 1;
        (end >= 0).then_some((0, end))
    }

    /// Run a retention sweep unless one is already in progress
    pub async fn try_retention(&self, now_millis: i64) -> Option<StorageResult<u64>> {
        let Ok(_guard) = self.retention_lock.try_lock() else {
            debug!("retention sweep already running, skipping tick");
            return None;
        };
        Some(self.retention_locked(now_millis).await)
    }

    /// Run a retention sweep, waiting for an in-progress one first
    pub async fn run_retention(&self, now_millis: i64) -> StorageResult<u64> {
        let _guard = self.retention_lock.lock().await;
        self.retention_locked(now_millis).await
    }

    #[instrument(skip(self), name = "retention")]
    async fn retention_locked(&self, now_millis: i64) -> StorageResult<u64> {
        let Some((start, end)) = self.retention_window(now_millis) else {
            debug!("retention window is empty");
            return Ok(0);
        };

        match self
            .persistence
            .purge_history(start, end, self.storage_timeout)
            .await
        {
            Ok(deleted) => {
                self.counters
                    .rows_deleted
                    .fetch_add(deleted, Ordering::Relaxed);
                self.counters
                    .last_retention
                    .store(now_millis, Ordering::Relaxed);
                info!("retention sweep removed {} rows up to {}", deleted, end);
                Ok(deleted)
            }
            Err(e) => {
                if e.is_retryable() {
                    warn!("retention sweep failed, retrying next cycle: {}", e);
                } else {
                    error!("retention sweep failed: {}", e);
                }
                Err(e)
            }
        }
    }

    pub fn stats(&self) -> FlushStats {
        let counters = &self.counters;
        let last_retention = match counters.last_retention.load(Ordering::Relaxed) {
            i64::MIN => None,
            millis => DateTime::from_timestamp_millis(millis),
        };

        FlushStats {
            buffered_ids: self.aggregator.len(),
            cycles: counters.cycles.load(Ordering::Relaxed),
            skipped_ticks: counters.skipped_ticks.load(Ordering::Relaxed),
            inserted_total: counters.inserted.load(Ordering::Relaxed),
            updated_total: counters.updated.load(Ordering::Relaxed),
            retried_total: counters.retried.load(Ordering::Relaxed),
            dropped_total: counters.dropped.load(Ordering::Relaxed),
            last_batch_size: counters.last_batch_size.load(Ordering::Relaxed),
            consecutive_unavailable_cycles: counters.consecutive_unavailable.load(Ordering::Relaxed),
            rows_deleted: counters.rows_deleted.load(Ordering::Relaxed),
            last_retention,
        }
    }
}
