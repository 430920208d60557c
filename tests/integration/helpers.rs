//! Helper functions for integration tests

use std::sync::Arc;

use apm_collector::agent_stream::AgentStreamModule;
use apm_collector::aggregator::{MetricAggregator, ServiceReferenceEvent};
use apm_collector::collector::Collector;
use apm_collector::config::FlushConfig;
use apm_collector::flush::FlushScheduler;
use apm_collector::module::{DEFAULT_PROVIDER, ModuleRegistry};
use apm_collector::storage::memory::MemoryBackend;
use apm_collector::storage::{MetricPersistence, StorageModule};

pub const MINUTE: i64 = 60_000;

/// A call from service 20 to service 30 under entry service 10
pub fn call(timestamp: i64, duration: i64, is_error: bool) -> ServiceReferenceEvent {
    ServiceReferenceEvent {
        entry_service_id: 10,
        front_service_id: 20,
        behind_service_id: 30,
        timestamp,
        duration,
        is_error,
    }
}

/// Timers far enough out that only explicit flushes run
pub fn manual_flush_config() -> FlushConfig {
    FlushConfig {
        interval_secs: 3600,
        retention_interval_secs: 3600,
        storage_timeout_secs: 5,
        ..FlushConfig::default()
    }
}

pub fn memory_scheduler(
    aggregator: &Arc<MetricAggregator>,
) -> (Arc<MemoryBackend>, FlushScheduler) {
    let backend = Arc::new(MemoryBackend::new());
    let persistence: Arc<dyn MetricPersistence> = backend.clone();
    let scheduler = FlushScheduler::new(
        Arc::clone(aggregator),
        persistence,
        &manual_flush_config(),
    );
    (backend, scheduler)
}

/// A collector whose memory backend stays inspectable
pub fn memory_collector() -> (Arc<MemoryBackend>, Collector) {
    let aggregator = Arc::new(MetricAggregator::new(8));
    let backend = Arc::new(MemoryBackend::new());

    let mut registry = ModuleRegistry::new([DEFAULT_PROVIDER, "memory"]);
    registry.register(AgentStreamModule::descriptor()).unwrap();
    registry.register(StorageModule::descriptor()).unwrap();
    AgentStreamModule::provide_defaults(&mut registry, Arc::clone(&aggregator)).unwrap();
    StorageModule::provide_backend(&mut registry, "memory", backend.clone()).unwrap();

    let collector = Collector::start(registry, aggregator, &manual_flush_config()).unwrap();
    (backend, collector)
}
