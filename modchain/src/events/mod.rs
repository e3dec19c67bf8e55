//! Event sink system for observability.
//!
//! Components receive an `Arc<dyn EventSink>` at construction time and emit
//! [`EngineEvent`](crate::core::EngineEvent)s through it. Sinks are
//! fire-and-forget: no component waits on a consumer.

mod channel;
mod sink;

pub use channel::{ChannelEventSink, ChannelMetrics};
pub use sink::{
    CallbackEventSink, CollectingEventSink, EventCallback, EventSink, LoggingEventSink,
    NoOpEventSink,
};

use std::sync::Arc;

/// Returns the sink used when none is configured.
#[must_use]
pub fn default_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpEventSink)
}
