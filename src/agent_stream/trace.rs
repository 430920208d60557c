//! Trace segment intake
//!
//! A segment is the part of a trace recorded by one instance. Each of its
//! service references (a call from a front service to a behind service,
//! under an entry service) becomes one observation for the aggregator.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, instrument};

use crate::aggregator::{InvalidEvent, MetricAggregator, ServiceReferenceEvent};

/// One service-to-service call recorded in a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SegmentReference {
    pub entry_service_id: i32,
    pub front_service_id: i32,
    pub behind_service_id: i32,
    /// Unix milliseconds
    pub start_time: i64,
    /// Unix milliseconds
    pub end_time: i64,
    pub is_error: bool,
}

impl SegmentReference {
    /// Observation for this reference
    ///
    /// The duration saturates. An overflow needs a negative start time or
    /// an end far before the start, and both are rejected by
    /// [`ServiceReferenceEvent::identity`].
    pub fn to_event(&self) -> ServiceReferenceEvent {
        ServiceReferenceEvent {
            entry_service_id: self.entry_service_id,
            front_service_id: self.front_service_id,
            behind_service_id: self.behind_service_id,
            timestamp: self.start_time,
            duration: self.end_time.saturating_sub(self.start_time),
            is_error: self.is_error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TraceSegment {
    pub segment_id: String,
    pub application_id: i32,
    pub instance_id: i32,
    #[serde(default)]
    pub references: Vec<SegmentReference>,
}

/// Accepts trace segments sent by agents
pub trait TraceSegmentService: Send + Sync {
    /// Feed a segment into aggregation
    ///
    /// Returns the number of observations recorded. A segment with any
    /// malformed reference is rejected as a whole.
    fn send(&self, segment: &TraceSegment) -> Result<usize, InvalidEvent>;
}

/// Default segment service writing into the shared aggregator
pub struct SegmentService {
    aggregator: Arc<MetricAggregator>,
}

impl SegmentService {
    pub fn new(aggregator: Arc<MetricAggregator>) -> Self {
        Self { aggregator }
    }
}

impl TraceSegmentService for SegmentService {
    #[instrument(skip_all, fields(segment = %segment.segment_id))]
    fn send(&self, segment: &TraceSegment) -> Result<usize, InvalidEvent> {
        let events: Vec<ServiceReferenceEvent> =
            segment.references.iter().map(SegmentReference::to_event).collect();

        for event in &events {
            if let Err(e) = event.identity() {
                debug!("rejecting segment: {}", e);
                return Err(e);
            }
        }

        for event in &events {
            self.aggregator.observe(event)?;
        }
        Ok(events.len())
    }
}
