//! Actor-based scheduling
//!
//! Each actor runs as an independent async task controlled through a
//! cloneable handle.
//!
//! ## Architecture Overview
//!
//! ```text
//!   producers ──observe()──▶ MetricAggregator
//!                                  │ drain / restore
//!                          ┌───────▼────────┐
//!   SchedulerHandle ──cmd──▶ SchedulerActor │ flush + retention ticks
//!                          └───────┬────────┘
//!                                  │ persist / purge_history
//!                          dyn MetricPersistence
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each actor has an mpsc command channel for control messages
//! 2. **Request/Response**: oneshot channels for synchronous queries

pub mod messages;
pub mod scheduler;

pub use messages::SchedulerCommand;
pub use scheduler::{SchedulerActor, SchedulerHandle};
