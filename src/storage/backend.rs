//! Persistence contract that every storage backend implements
//!
//! The contract is split in three layers:
//!
//! - [`StorageBackend`]: object-safe housekeeping (health, close)
//! - [`PersistenceDao`]: the storage-agnostic DAO for service reference
//!   metrics. Backends choose their own write operation types; callers
//!   only collect them into batches and hand them back.
//! - [`MetricPersistence`]: object-safe capability the module registry
//!   binds. It is implemented for every `PersistenceDao` and runs the
//!   get / merge / prepare / submit flush protocol on top of it.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use super::error::{StorageError, StorageResult};
use super::schema::ServiceReferenceMetric;
use crate::flush::{self, PersistOutcome};

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Failure of a batch submission
///
/// `failed` holds the positions (in submission order) of the operations
/// that were not applied. Backends that apply a batch atomically report
/// every position.
#[derive(Debug)]
pub struct BatchFailure {
    pub failed: Vec<usize>,
    pub error: StorageError,
}

impl BatchFailure {
    /// The whole batch of `len` operations failed
    pub fn all(len: usize, error: StorageError) -> Self {
        Self {
            failed: (0..len).collect(),
            error,
        }
    }
}

/// Housekeeping shared by all backends
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short backend name for logs and health output
    fn name(&self) -> &'static str;

    /// Check backend health
    ///
    /// Performs a lightweight operation to verify the backend
    /// is operational (e.g., ping database).
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}

/// Storage-agnostic DAO for service reference metrics
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared between the
/// flush and retention tasks.
#[async_trait]
pub trait PersistenceDao: StorageBackend {
    /// Backend-specific descriptor creating a new row
    type InsertOp: Send + 'static;

    /// Backend-specific descriptor overwriting a stored row's counters
    type UpdateOp: Send + 'static;

    /// Point lookup by deterministic id. A missing row is `Ok(None)`.
    async fn get(&self, id: &str) -> StorageResult<Option<ServiceReferenceMetric>>;

    /// Build a write creating a new row keyed by `metric.id`, carrying all
    /// identity and counter columns.
    fn prepare_insert(&self, metric: &ServiceReferenceMetric) -> Self::InsertOp;

    /// Build a write overwriting the stored counters with the given,
    /// already merged, totals.
    fn prepare_update(&self, metric: &ServiceReferenceMetric) -> Self::UpdateOp;

    /// Submit a batch of inserts
    async fn batch_insert(&self, ops: Vec<Self::InsertOp>) -> Result<(), BatchFailure>;

    /// Submit a batch of updates
    async fn batch_update(&self, ops: Vec<Self::UpdateOp>) -> Result<(), BatchFailure>;

    /// Delete every row whose time bucket lies in
    /// `[bucket(start_timestamp), bucket(end_timestamp)]`, both inclusive.
    ///
    /// Timestamps are unix milliseconds. Returns the number of rows removed.
    async fn delete_history(&self, start_timestamp: i64, end_timestamp: i64) -> StorageResult<u64>;
}

/// The persistence capability consumed by the flush scheduler
#[async_trait]
pub trait MetricPersistence: StorageBackend {
    /// Absorb a drained set of buffered deltas into storage
    ///
    /// Every storage call is bounded by `timeout`. Deltas that could not be
    /// persisted for transient reasons are handed back in
    /// [`PersistOutcome::retry`].
    async fn persist(
        &self,
        deltas: Vec<ServiceReferenceMetric>,
        timeout: Duration,
    ) -> PersistOutcome;

    /// Range delete by time bucket, bounded by `timeout`
    async fn purge_history(
        &self,
        start_timestamp: i64,
        end_timestamp: i64,
        timeout: Duration,
    ) -> StorageResult<u64>;
}

#[async_trait]
impl<D: PersistenceDao> MetricPersistence for D {
    async fn persist(
        &self,
        deltas: Vec<ServiceReferenceMetric>,
        timeout: Duration,
    ) -> PersistOutcome {
        flush::persist_batch(self, deltas, timeout).await
    }

    async fn purge_history(
        &self,
        start_timestamp: i64,
        end_timestamp: i64,
        timeout: Duration,
    ) -> StorageResult<u64> {
        flush::bounded(
            timeout,
            "delete history",
            self.delete_history(start_timestamp, end_timestamp),
        )
        .await
    }
}
