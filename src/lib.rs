//! Ingestion and aggregation core of an APM collector
//!
//! Agents report service-to-service calls; the [`aggregator`] merges them
//! into per-minute [`storage::ServiceReferenceMetric`] rows and the
//! [`flush`] cycle persists those through whichever storage provider the
//! [`module`] registry bound at startup.

pub mod actors;
pub mod agent_stream;
pub mod aggregator;
#[cfg(feature = "api")]
pub mod api;
pub mod collector;
pub mod config;
pub mod flush;
pub mod module;
pub mod storage;
pub mod util;

pub use aggregator::{InvalidEvent, MetricAggregator, ServiceReferenceEvent};
pub use collector::Collector;
