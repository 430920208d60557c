//! Collector bootstrap
//!
//! Wires the modules to their providers and starts the scheduler. Any
//! registry error here is fatal: a collector whose storage or module wiring
//! is incomplete must not start.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::actors::SchedulerHandle;
use crate::agent_stream::{AgentStreamModule, TraceSegmentService};
use crate::aggregator::MetricAggregator;
use crate::config::{Config, FlushConfig};
use crate::flush::{FlushReport, FlushScheduler};
use crate::module::ModuleRegistry;
use crate::storage::{MetricPersistence, StorageModule};

/// A running collector core
pub struct Collector {
    registry: Arc<ModuleRegistry>,
    aggregator: Arc<MetricAggregator>,
    scheduler: SchedulerHandle,
    persistence: Arc<dyn MetricPersistence>,
}

impl Collector {
    /// Register both modules, resolve their providers and start flushing
    #[instrument(skip_all)]
    pub async fn bootstrap(config: &Config) -> Result<Self> {
        let aggregator = Arc::new(MetricAggregator::new(config.aggregator.shards));
        info!(
            "aggregator created with {} shards",
            aggregator.shard_count()
        );

        let mut registry = ModuleRegistry::new(config.active_providers());
        registry.register(AgentStreamModule::descriptor())?;
        registry.register(StorageModule::descriptor())?;

        AgentStreamModule::provide_defaults(&mut registry, Arc::clone(&aggregator))?;
        StorageModule::provide(&mut registry, &config.storage)
            .await
            .context("failed to initialize storage provider")?;

        Self::start(registry, aggregator, &config.flush)
    }

    /// Start from a populated registry
    ///
    /// The registry is resolved here if that has not happened yet.
    pub fn start(
        mut registry: ModuleRegistry,
        aggregator: Arc<MetricAggregator>,
        flush: &FlushConfig,
    ) -> Result<Self> {
        registry.resolve()?;

        let persistence = registry.lookup::<dyn MetricPersistence>()?;
        info!("metric persistence bound to {} storage", persistence.name());

        let scheduler = Arc::new(FlushScheduler::new(
            Arc::clone(&aggregator),
            Arc::clone(&persistence),
            flush,
        ));
        let scheduler = SchedulerHandle::spawn(scheduler, flush);

        Ok(Self {
            registry: Arc::new(registry),
            aggregator,
            scheduler,
            persistence,
        })
    }

    pub fn aggregator(&self) -> &Arc<MetricAggregator> {
        &self.aggregator
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    pub fn persistence(&self) -> &Arc<dyn MetricPersistence> {
        &self.persistence
    }

    /// The bound trace segment intake
    pub fn segments(&self) -> Result<Arc<dyn TraceSegmentService>> {
        Ok(self.registry.lookup::<dyn TraceSegmentService>()?)
    }

    /// Stop the scheduler after a final flush
    pub async fn shutdown(&self) -> Result<FlushReport> {
        info!("shutting down collector");
        let report = self.scheduler.shutdown().await?;
        info!(
            "final flush: {} inserted, {} updated, {} not persisted",
            report.inserted,
            report.updated,
            report.retried + report.dropped
        );
        Ok(report)
    }
}
