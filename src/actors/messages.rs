//! Message types for actor communication
//!
//! Commands are sent to a specific actor via mpsc; replies come back on a
//! oneshot channel carried inside the command.

use tokio::sync::oneshot;

use crate::flush::{FlushReport, FlushStats};
use crate::storage::StorageResult;

/// Commands that can be sent to the SchedulerActor
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Run a flush cycle now, waiting for an in-progress one first
    Flush {
        respond_to: oneshot::Sender<FlushReport>,
    },

    /// Run a retention sweep as if the clock read `now_millis`
    RunRetention {
        now_millis: i64,
        respond_to: oneshot::Sender<StorageResult<u64>>,
    },

    /// Get current flush and retention counters
    GetStats {
        respond_to: oneshot::Sender<FlushStats>,
    },

    /// Gracefully shut down the scheduler
    ///
    /// In-flight cycles complete, then a final flush drains the buffer and
    /// the storage backend is closed. The reply carries the final report.
    Shutdown {
        respond_to: oneshot::Sender<FlushReport>,
    },
}
