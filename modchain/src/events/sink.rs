//! Event sink trait and implementations.

use crate::core::EngineEvent;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, Level};

/// Trait for event sinks that can receive engine events.
///
/// Sinks are handed explicitly to each component; there is no process-wide
/// event bus.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event, waiting for capacity if the sink is bounded.
    async fn emit(&self, event: EngineEvent) {
        self.try_emit(event);
    }

    /// Emits an event without blocking.
    ///
    /// This method must never panic. Sinks that cannot accept the event
    /// drop it and account for the drop themselves.
    fn try_emit(&self, event: EngineEvent);
}

/// A no-op event sink that discards all events.
///
/// Used as the default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    fn try_emit(&self, _event: EngineEvent) {}
}

/// An event sink that logs events using the tracing framework.
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
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event: &EngineEvent) {
        let event_type = event.event_type();
        let data = event.data();
        if self.level == Level::DEBUG {
            debug!(event_type = %event_type, event_data = %data, "Event: {}", event_type);
        } else {
            info!(event_type = %event_type, event_data = %data, "Event: {}", event_type);
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    fn try_emit(&self, event: EngineEvent) {
        self.log_event(&event);
    }
}

/// Callback invoked by [`CallbackEventSink`].
pub type EventCallback = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

/// An event sink that forwards events to registered callbacks.
///
/// Callbacks run synchronously on the emitting task and should return
/// quickly. A panicking callback is logged and does not affect the others.
#[derive(Default)]
pub struct CallbackEventSink {
    callbacks: RwLock<Vec<EventCallback>>,
}

impl CallbackEventSink {
    /// Creates a sink with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback for every subsequent event.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        self.callbacks.write().push(Arc::new(callback));
    }

    /// Returns the number of registered callbacks.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.callbacks.read().len()
    }
}

impl std::fmt::Debug for CallbackEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackEventSink")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[async_trait]
impl EventSink for CallbackEventSink {
    fn try_emit(&self, event: EngineEvent) {
        let callbacks = self.callbacks.read().clone();
        for callback in callbacks {
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(&event);
            })) {
                tracing::warn!("Event callback panicked: {:?}", e);
            }
        }
    }
}

/// A collecting event sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<EngineEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.read().clone()
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

    /// Returns events whose dotted name starts with `type_prefix`.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<EngineEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type().starts_with(type_prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    fn try_emit(&self, event: EngineEvent) {
        self.events.write().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CircuitState, RunStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn finished(run_id: &str) -> EngineEvent {
        EngineEvent::RunFinished {
            run_id: run_id.to_string(),
            status: RunStatus::Completed,
        }
    }

    #[tokio::test]
    async fn test_noop_sink() {
        let sink = NoOpEventSink;
        sink.emit(finished("r")).await;
        sink.try_emit(finished("r"));
    }

    #[tokio::test]
    async fn test_logging_sink() {
        let sink = LoggingEventSink::debug();
        sink.emit(finished("r")).await;
        LoggingEventSink::default().try_emit(finished("r"));
    }

    #[tokio::test]
    async fn test_collecting_sink_filter() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit(finished("r1")).await;
        sink.try_emit(EngineEvent::CircuitStateChanged {
            module_id: "m".into(),
            from: CircuitState::Closed,
            to: CircuitState::Open,
        });
        sink.try_emit(EngineEvent::RolledBack {
            run_id: "r2".into(),
            reason: "x".into(),
        });

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.events_of_type("pipeline.").len(), 2);
        assert_eq!(sink.events_of_type("circuit.").len(), 1);

        sink.clear();
        assert!(sink.is_empty());
    }

    #[test]
    fn test_callback_sink_fans_out() {
        let sink = CallbackEventSink::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let counter = counter.clone();
            sink.subscribe(move |_event| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        sink.try_emit(finished("r"));
        assert_eq!(sink.subscriber_count(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_callback_panic_suppressed() {
        let sink = CallbackEventSink::new();
        let counter = Arc::new(AtomicUsize::new(0));

        sink.subscribe(|_event| panic!("Intentional panic"));
        let counter_clone = counter.clone();
        sink.subscribe(move |_event| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        sink.try_emit(finished("r"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
