//! Storage backends for metric persistence
//!
//! This module provides a trait-based abstraction for storing service
//! reference metrics to various backends.
//!
//! ## Design
//!
//! - **Trait-based**: `PersistenceDao` lets backends pick their own write
//!   operation types
//! - **Async**: All operations are async for compatibility with Tokio actors
//! - **Batch-oriented**: Writes are submitted as insert and update batches
//!
//! ## Backends
//!
//! - **SQLite** (`storage-sqlite` feature): Embedded database
//! - **In-Memory**: No persistence, for testing and single-process setups
//!
//! ## Usage
//!
//! ```no_run
//! use apm_collector::storage::{StorageBackend, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./apm-collector.db").await?;
//!     assert!(backend.health_check().await?.healthy);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

use std::sync::Arc;

use tracing::info;

pub use backend::{BatchFailure, HealthStatus, MetricPersistence, PersistenceDao, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use schema::{MetricCounters, MetricIdentity, ServiceReferenceMetric};

use crate::config::StorageConfig;
use crate::module::{ModuleDescriptor, ModuleRegistry, RegistryError};
use memory::MemoryBackend;

/// The storage module: one persistence capability
pub struct StorageModule;

impl StorageModule {
    pub const NAME: &'static str = "storage";

    pub fn descriptor() -> ModuleDescriptor {
        ModuleDescriptor::new(Self::NAME).requires::<dyn MetricPersistence>()
    }

    /// Offer the storage providers available for `config`
    ///
    /// The in-memory provider is always offered. The SQLite provider opens
    /// its database here, so it is only offered when `config` selects it.
    pub async fn provide(
        registry: &mut ModuleRegistry,
        config: &StorageConfig,
    ) -> anyhow::Result<()> {
        registry.provide::<dyn MetricPersistence, _>("memory", || {
            Arc::new(MemoryBackend::new()) as Arc<dyn MetricPersistence>
        })?;

        match config {
            StorageConfig::Memory => {}
            #[cfg(feature = "storage-sqlite")]
            StorageConfig::Sqlite { path } => {
                let backend = sqlite::SqliteBackend::new(path).await?;
                info!("SQLite storage opened at {}", path.display());
                registry.provide::<dyn MetricPersistence, _>("sqlite", move || {
                    Arc::new(backend) as Arc<dyn MetricPersistence>
                })?;
            }
            #[cfg(not(feature = "storage-sqlite"))]
            StorageConfig::Sqlite { .. } => {
                info!("SQLite storage selected but not compiled in");
            }
        }

        Ok(())
    }

    /// Provide an already constructed backend under `provider`
    pub fn provide_backend(
        registry: &mut ModuleRegistry,
        provider: &str,
        backend: Arc<dyn MetricPersistence>,
    ) -> Result<(), RegistryError> {
        registry.provide::<dyn MetricPersistence, _>(provider, move || backend)
    }
}
