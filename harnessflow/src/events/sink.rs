//! Event sink trait and implementations.

use serde_json::Value;
use tracing::{debug, info, Level};

/// Receives run events.
///
/// Sinks are shared across stage tasks, so they must be cheap to call and
/// must never fail the caller.
pub trait EventSink: Send + Sync {
    /// Emits an event without blocking.
    ///
    /// # Arguments
    ///
    /// * `event_type` - The type of event (e.g., "stage.started")
    /// * `data` - Optional event payload
    ///
    /// Errors are logged and suppressed.
    fn try_emit(&self, event_type: &str, data: Option<Value>);
}

/// A sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn try_emit(&self, _event_type: &str, _data: Option<Value>) {}
}

/// A sink that writes events to the `tracing` subscriber.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a logging sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn field<'a>(data: Option<&'a Value>, key: &str) -> &'a str {
        data.and_then(|d| d.get(key)).and_then(Value::as_str).unwrap_or("")
    }

    fn log_event(&self, event_type: &str, data: Option<&Value>) {
        let stage = Self::field(data, "stage");
        let container = Self::field(data, "container");
        if self.level == Level::DEBUG {
            debug!(event_type = %event_type, stage, container, event_data = ?data, "{event_type}");
        } else {
            info!(event_type = %event_type, stage, container, event_data = ?data, "{event_type}");
        }
    }
}

impl EventSink for LoggingEventSink {
    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.log_event(event_type, data.as_ref());
    }
}

/// A sink that records events in memory, for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<(String, Option<Value>)>>,
}

impl CollectingEventSink {
    /// Creates an empty collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Option<Value>)> {
        self.events.read().clone()
    }

    /// Returns the collected event types in emission order.
    #[must_use]
    pub fn types(&self) -> Vec<String> {
        self.events.read().iter().map(|(t, _)| t.clone()).collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events whose type starts with `type_prefix`.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<(String, Option<Value>)> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t.starts_with(type_prefix))
            .cloned()
            .collect()
    }

    /// Returns the `stage` field of every event with exactly this type.
    #[must_use]
    pub fn stages_for(&self, event_type: &str) -> Vec<String> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t == event_type)
            .filter_map(|(_, d)| d.as_ref()?.get("stage")?.as_str().map(str::to_string))
            .collect()
    }
}

impl EventSink for CollectingEventSink {
    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.events.write().push((event_type.to_string(), data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types;
    use serde_json::json;

    #[test]
    fn test_logging_sink_does_not_panic() {
        let sink = LoggingEventSink::default();
        sink.try_emit(types::STAGE_STARTED, Some(json!({"stage": "lint"})));
        sink.try_emit(types::CONTAINER_STOPPED, Some(json!({"container": "mock_uss"})));
        LoggingEventSink::debug().try_emit(types::PIPELINE_COMPLETED, None);
        NoOpEventSink.try_emit(types::PIPELINE_STARTED, None);
    }

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.try_emit(types::STAGE_STARTED, Some(json!({"stage": "lint"})));
        sink.try_emit(types::STAGE_FAILED, Some(json!({"stage": "lint", "exit_code": 1})));
        sink.try_emit(types::CONTAINER_STARTED, Some(json!({"container": "mock_uss"})));

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.events_of_type("stage.").len(), 2);
        assert_eq!(sink.stages_for(types::STAGE_FAILED), vec!["lint".to_string()]);
        assert_eq!(
            sink.types(),
            vec!["stage.started", "stage.failed", "container.started"]
        );

        sink.clear();
        assert!(sink.is_empty());
    }
}
