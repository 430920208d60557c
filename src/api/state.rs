//! API shared state

use std::sync::Arc;

use crate::actors::SchedulerHandle;
use crate::collector::Collector;
use crate::module::ModuleRegistry;
use crate::storage::MetricPersistence;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Handle to the scheduler actor for flush statistics
    pub scheduler: SchedulerHandle,

    /// Resolved registry, read-only
    pub registry: Arc<ModuleRegistry>,

    /// Bound persistence provider for health checks
    pub persistence: Arc<dyn MetricPersistence>,
}

impl ApiState {
    pub fn new(
        scheduler: SchedulerHandle,
        registry: Arc<ModuleRegistry>,
        persistence: Arc<dyn MetricPersistence>,
    ) -> Self {
        Self {
            scheduler,
            registry,
            persistence,
        }
    }

    pub fn from_collector(collector: &Collector) -> Self {
        Self::new(
            collector.scheduler().clone(),
            Arc::clone(collector.registry()),
            Arc::clone(collector.persistence()),
        )
    }
}
