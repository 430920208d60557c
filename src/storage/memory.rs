//! In-memory storage backend (no persistence)
//!
//! Rows live in a map keyed by id for the lifetime of the process.
//! It's useful for:
//! - Testing without database dependencies
//! - Single-process deployments that only need live aggregates
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart
//! - **Unbounded**: Only the retention sweep removes rows

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tracing::{debug, info, trace};

use super::backend::{BatchFailure, HealthStatus, PersistenceDao, StorageBackend};
use super::error::StorageResult;
use super::schema::{ServiceReferenceMetric, TABLE};
use crate::util::minute_time_bucket;

/// Write descriptor of the in-memory backend: the full row to store
#[derive(Debug, Clone)]
pub struct MemoryWrite(pub ServiceReferenceMetric);

/// In-memory storage backend
pub struct MemoryBackend {
    rows: RwLock<HashMap<String, ServiceReferenceMetric>>,
}

impl MemoryBackend {
    /// Create a new, empty in-memory backend
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored rows
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of all stored rows, ordered by id
    pub fn rows(&self) -> Vec<ServiceReferenceMetric> {
        let mut rows: Vec<_> = self.read().values().cloned().collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        rows
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ServiceReferenceMetric>> {
        self.rows.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ServiceReferenceMetric>> {
        self.rows.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("rows".to_string(), self.len().to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}

#[async_trait]
impl PersistenceDao for MemoryBackend {
    type InsertOp = MemoryWrite;
    type UpdateOp = MemoryWrite;

    async fn get(&self, id: &str) -> StorageResult<Option<ServiceReferenceMetric>> {
        Ok(self.read().get(id).cloned())
    }

    fn prepare_insert(&self, metric: &ServiceReferenceMetric) -> MemoryWrite {
        MemoryWrite(metric.clone())
    }

    fn prepare_update(&self, metric: &ServiceReferenceMetric) -> MemoryWrite {
        MemoryWrite(metric.clone())
    }

    async fn batch_insert(&self, ops: Vec<MemoryWrite>) -> Result<(), BatchFailure> {
        trace!("in-memory batch insert of {} rows", ops.len());
        let mut rows = self.write();
        for MemoryWrite(metric) in ops {
            rows.insert(metric.id.clone(), metric);
        }
        Ok(())
    }

    async fn batch_update(&self, ops: Vec<MemoryWrite>) -> Result<(), BatchFailure> {
        trace!("in-memory batch update of {} rows", ops.len());
        let mut rows = self.write();
        for MemoryWrite(metric) in ops {
            rows.insert(metric.id.clone(), metric);
        }
        Ok(())
    }

    async fn delete_history(&self, start_timestamp: i64, end_timestamp: i64) -> StorageResult<u64> {
        let start_bucket = minute_time_bucket(start_timestamp);
        let end_bucket = minute_time_bucket(end_timestamp);

        let mut rows = self.write();
        let before = rows.len();
        rows.retain(|_, row| !(start_bucket..=end_bucket).contains(&row.time_bucket()));
        let deleted = (before - rows.len()) as u64;

        info!("deleted {} rows of history from {}", deleted, TABLE);
        Ok(deleted)
    }
}
