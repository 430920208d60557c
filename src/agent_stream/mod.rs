//! Agent stream module
//!
//! Everything agents talk to: id registers, JVM metric intake and trace
//! segment intake. Only the segment service feeds the metric aggregator;
//! registers and JVM metrics are kept in process.

pub mod jvm;
pub mod register;
pub mod trace;

use std::sync::Arc;

use crate::aggregator::MetricAggregator;
use crate::module::{DEFAULT_PROVIDER, ModuleDescriptor, ModuleRegistry, RegistryError};

pub use jvm::{
    CpuMetricService, GcMetricService, InstanceHeartBeatService, JvmMetricRecorder,
    MemoryMetricService, MemoryPoolMetricService,
};
pub use register::{
    ApplicationIdService, InMemoryRegister, InstanceIdService, ServiceNameService,
};
pub use trace::{SegmentService, TraceSegment, TraceSegmentService};

pub struct AgentStreamModule;

impl AgentStreamModule {
    pub const NAME: &'static str = "agent_stream";

    pub fn descriptor() -> ModuleDescriptor {
        ModuleDescriptor::new(Self::NAME)
            .requires::<dyn ApplicationIdService>()
            .requires::<dyn InstanceIdService>()
            .requires::<dyn ServiceNameService>()
            .requires::<dyn CpuMetricService>()
            .requires::<dyn GcMetricService>()
            .requires::<dyn MemoryMetricService>()
            .requires::<dyn MemoryPoolMetricService>()
            .requires::<dyn InstanceHeartBeatService>()
            .requires::<dyn TraceSegmentService>()
    }

    /// Offer the built-in implementations under [`DEFAULT_PROVIDER`]
    ///
    /// The three registers share one [`InMemoryRegister`] and the five JVM
    /// capabilities share one [`JvmMetricRecorder`].
    pub fn provide_defaults(
        registry: &mut ModuleRegistry,
        aggregator: Arc<MetricAggregator>,
    ) -> Result<(), RegistryError> {
        let register = Arc::new(InMemoryRegister::new());
        let recorder = Arc::new(JvmMetricRecorder::new());

        let r = Arc::clone(&register);
        registry.provide::<dyn ApplicationIdService, _>(DEFAULT_PROVIDER, move || {
            r as Arc<dyn ApplicationIdService>
        })?;
        let r = Arc::clone(&register);
        registry.provide::<dyn InstanceIdService, _>(DEFAULT_PROVIDER, move || {
            r as Arc<dyn InstanceIdService>
        })?;
        registry.provide::<dyn ServiceNameService, _>(DEFAULT_PROVIDER, move || {
            register as Arc<dyn ServiceNameService>
        })?;

        let j = Arc::clone(&recorder);
        registry.provide::<dyn CpuMetricService, _>(DEFAULT_PROVIDER, move || {
            j as Arc<dyn CpuMetricService>
        })?;
        let j = Arc::clone(&recorder);
        registry.provide::<dyn GcMetricService, _>(DEFAULT_PROVIDER, move || {
            j as Arc<dyn GcMetricService>
        })?;
        let j = Arc::clone(&recorder);
        registry.provide::<dyn MemoryMetricService, _>(DEFAULT_PROVIDER, move || {
            j as Arc<dyn MemoryMetricService>
        })?;
        let j = Arc::clone(&recorder);
        registry.provide::<dyn MemoryPoolMetricService, _>(DEFAULT_PROVIDER, move || {
            j as Arc<dyn MemoryPoolMetricService>
        })?;
        registry.provide::<dyn InstanceHeartBeatService, _>(DEFAULT_PROVIDER, move || {
            recorder as Arc<dyn InstanceHeartBeatService>
        })?;

        registry.provide::<dyn TraceSegmentService, _>(DEFAULT_PROVIDER, move || {
            Arc::new(SegmentService::new(aggregator)) as Arc<dyn TraceSegmentService>
        })?;

        Ok(())
    }
}
