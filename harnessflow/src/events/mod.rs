//! Run events.
//!
//! The scheduler and the container lifecycle manager report every state
//! transition through an [`EventSink`]. Event types are dotted strings (see
//! [`types`]) and payloads are JSON objects, so sinks can forward them to logs
//! or collect them in tests without knowing the concrete source.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names emitted by the orchestrator.
pub mod types {
    /// A pipeline run began.
    pub const PIPELINE_STARTED: &str = "pipeline.started";
    /// A pipeline run finished (after teardown).
    pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
    /// Cancellation was observed by the scheduler.
    pub const PIPELINE_CANCELLED: &str = "pipeline.cancelled";
    /// A stage was dispatched to a worker.
    pub const STAGE_STARTED: &str = "stage.started";
    /// A stage succeeded.
    pub const STAGE_SUCCEEDED: &str = "stage.succeeded";
    /// A stage failed.
    pub const STAGE_FAILED: &str = "stage.failed";
    /// A stage was skipped.
    pub const STAGE_SKIPPED: &str = "stage.skipped";
    /// A stale container was removed before start.
    pub const CONTAINER_REMOVED: &str = "container.removed";
    /// A container was started.
    pub const CONTAINER_STARTED: &str = "container.started";
    /// A container passed its readiness probe.
    pub const CONTAINER_HEALTHY: &str = "container.healthy";
    /// A container was stopped and removed.
    pub const CONTAINER_STOPPED: &str = "container.stopped";
}
