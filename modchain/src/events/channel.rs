//! Bounded channel event sink.

use super::EventSink;
use crate::core::EngineEvent;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Metrics for channel backpressure monitoring.
#[derive(Debug, Default)]
pub struct ChannelMetrics {
    emitted: AtomicU64,
    dropped: AtomicU64,
}

impl ChannelMetrics {
    /// Returns the number of events handed to the channel.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Returns the number of events dropped because the channel was full
    /// or closed.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Returns the drop rate as a percentage.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn drop_rate(&self) -> f64 {
        let emitted = self.emitted();
        let dropped = self.dropped();
        let total = emitted + dropped;
        if total == 0 {
            0.0
        } else {
            (dropped as f64 / total as f64) * 100.0
        }
    }

    /// Converts metrics to a dictionary.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "emitted": self.emitted(),
            "dropped": self.dropped(),
            "drop_rate_percent": (self.drop_rate() * 100.0).round() / 100.0
        })
    }
}

/// An event sink backed by a bounded `tokio::sync::mpsc` channel.
///
/// `try_emit` never waits: when the consumer falls behind, events are
/// dropped and counted. `emit` waits for capacity instead.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::Sender<EngineEvent>,
    metrics: Arc<ChannelMetrics>,
}

impl ChannelEventSink {
    /// Creates a sink and the receiver the consumer drains.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                metrics: Arc::new(ChannelMetrics::default()),
            },
            rx,
        )
    }

    /// Returns the sink's metrics.
    #[must_use]
    pub fn metrics(&self) -> &Arc<ChannelMetrics> {
        &self.metrics
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn emit(&self, event: EngineEvent) {
        if self.tx.send(event).await.is_ok() {
            self.metrics.emitted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn try_emit(&self, event: EngineEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {
                self.metrics.emitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(event_type = e.into_inner().event_type(), "Event dropped by channel sink");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RunStatus;

    fn finished(n: usize) -> EngineEvent {
        EngineEvent::RunFinished {
            run_id: format!("run-{n}"),
            status: RunStatus::Completed,
        }
    }

    #[tokio::test]
    async fn test_channel_delivers_in_order() {
        let (sink, mut rx) = ChannelEventSink::new(8);
        sink.try_emit(finished(1));
        sink.emit(finished(2)).await;

        assert_eq!(rx.recv().await, Some(finished(1)));
        assert_eq!(rx.recv().await, Some(finished(2)));
        assert_eq!(sink.metrics().emitted(), 2);
    }

    #[tokio::test]
    async fn test_channel_drops_when_full() {
        let (sink, mut rx) = ChannelEventSink::new(2);
        for n in 0..5 {
            sink.try_emit(finished(n));
        }

        assert_eq!(sink.metrics().emitted(), 2);
        assert_eq!(sink.metrics().dropped(), 3);
        assert!((sink.metrics().drop_rate() - 60.0).abs() < f64::EPSILON);

        assert_eq!(rx.recv().await, Some(finished(0)));
        assert_eq!(rx.recv().await, Some(finished(1)));
    }

    #[tokio::test]
    async fn test_channel_closed_counts_drop() {
        let (sink, rx) = ChannelEventSink::new(2);
        drop(rx);
        sink.emit(finished(1)).await;
        assert_eq!(sink.metrics().dropped(), 1);
        assert_eq!(sink.metrics().to_dict()["dropped"], 1);
    }
}
