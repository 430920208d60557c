//! Module registry wiring at collector level
//!
//! These tests verify that:
//! - The active configuration selects the storage provider
//! - Missing and ambiguous providers abort startup
//! - Capabilities shared by modules resolve to one instance

use std::sync::Arc;

use apm_collector::agent_stream::{AgentStreamModule, TraceSegmentService};
use apm_collector::aggregator::MetricAggregator;
use apm_collector::collector::Collector;
use apm_collector::config::Config;
use apm_collector::module::{DEFAULT_PROVIDER, ModuleRegistry, RegistryError};
use apm_collector::storage::memory::MemoryBackend;
use apm_collector::storage::{MetricPersistence, StorageModule};
use assert_matches::assert_matches;

use crate::helpers::manual_flush_config;

fn wired_registry(active: &[&str]) -> ModuleRegistry {
    let mut registry = ModuleRegistry::new(active.iter().copied());
    registry.register(AgentStreamModule::descriptor()).unwrap();
    registry.register(StorageModule::descriptor()).unwrap();
    AgentStreamModule::provide_defaults(&mut registry, Arc::new(MetricAggregator::default()))
        .unwrap();
    registry
}

#[test]
fn test_storage_without_active_provider_is_unresolved() {
    let mut registry = wired_registry(&[DEFAULT_PROVIDER, "sqlite"]);
    StorageModule::provide_backend(&mut registry, "memory", Arc::new(MemoryBackend::new()))
        .unwrap();

    assert_matches!(
        registry.resolve(),
        Err(RegistryError::UnresolvedCapability { module, capability })
            if module == "storage" && capability.contains("MetricPersistence")
    );
}

#[test]
fn test_two_storage_providers_are_ambiguous() {
    let mut registry = wired_registry(&[DEFAULT_PROVIDER, "memory", "sqlite"]);
    StorageModule::provide_backend(&mut registry, "memory", Arc::new(MemoryBackend::new()))
        .unwrap();
    StorageModule::provide_backend(&mut registry, "sqlite", Arc::new(MemoryBackend::new()))
        .unwrap();

    assert_matches!(
        registry.resolve(),
        Err(RegistryError::AmbiguousProvider { providers, .. }) if providers.len() == 2
    );
}

#[test]
fn test_agent_stream_without_default_provider_is_unresolved() {
    let mut registry = wired_registry(&["memory"]);
    StorageModule::provide_backend(&mut registry, "memory", Arc::new(MemoryBackend::new()))
        .unwrap();

    assert_matches!(
        registry.resolve(),
        Err(RegistryError::UnresolvedCapability { module, .. }) if module == "agent_stream"
    );
}

#[test]
fn test_duplicate_module_registration() {
    let mut registry = wired_registry(&[DEFAULT_PROVIDER]);

    assert_eq!(
        registry.register(StorageModule::descriptor()),
        Err(RegistryError::DuplicateModule("storage".to_string()))
    );
}

#[tokio::test]
async fn test_lookups_share_instances() {
    let collector = Collector::bootstrap(&Config::default()).await.unwrap();

    let first = collector.registry().lookup::<dyn TraceSegmentService>().unwrap();
    let second = collector.registry().lookup::<dyn TraceSegmentService>().unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let persistence = collector.registry().lookup::<dyn MetricPersistence>().unwrap();
    assert!(Arc::ptr_eq(&persistence, collector.persistence()));

    collector.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_start_rejects_unresolvable_registry() {
    let registry = wired_registry(&[DEFAULT_PROVIDER]);

    let result = Collector::start(
        registry,
        Arc::new(MetricAggregator::default()),
        &manual_flush_config(),
    );

    assert!(result.is_err());
}
