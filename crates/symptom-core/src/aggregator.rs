//! Fan-in of detected error events.
//!
//! One bounded `mpsc` channel is shared by every producer through
//! [`EventSink`] handles and drained by a single consumer task for the
//! whole session. A full channel blocks the producer; nothing is dropped.
//!
//! The channel is closed by [`ErrorAggregator::close`], which consumes the
//! aggregator and refuses to run while any sink is still alive. Since a
//! sink is the only way to send, no producer can write after close.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::domain::{AggregatorError, ErrorEvent};
use crate::obs;

/// Everything the consumer received, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportBuffer {
    pub events: Vec<ErrorEvent>,
    /// Events per source. Known sources are present even when zero.
    pub counts: BTreeMap<String, u64>,
    pub total: u64,
}

impl ReportBuffer {
    fn seeded<I: IntoIterator<Item = String>>(known_sources: I) -> Self {
        Self {
            counts: known_sources.into_iter().map(|s| (s, 0)).collect(),
            ..Self::default()
        }
    }

    fn record(&mut self, event: ErrorEvent) {
        *self.counts.entry(event.source.clone()).or_insert(0) += 1;
        self.total += 1;
        self.events.push(event);
    }

    /// Sources with at least one event.
    pub fn active_sources(&self) -> Vec<&str> {
        self.counts
            .iter()
            .filter(|(_, n)| **n > 0)
            .map(|(s, _)| s.as_str())
            .collect()
    }
}

/// Producer handle. Cloning registers another live producer.
#[derive(Debug)]
pub struct EventSink {
    tx: mpsc::Sender<ErrorEvent>,
    live: Arc<AtomicUsize>,
}

impl EventSink {
    fn new(tx: mpsc::Sender<ErrorEvent>, live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self { tx, live }
    }

    /// Send one event, waiting while the channel is full.
    pub async fn emit(&self, event: ErrorEvent) -> Result<(), AggregatorError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| AggregatorError::ChannelClosed)
    }
}

impl Clone for EventSink {
    fn clone(&self) -> Self {
        Self::new(self.tx.clone(), Arc::clone(&self.live))
    }
}

impl Drop for EventSink {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The bounded channel plus its consumer task.
pub struct ErrorAggregator {
    tx: mpsc::Sender<ErrorEvent>,
    live: Arc<AtomicUsize>,
    consumer: JoinHandle<ReportBuffer>,
}

impl ErrorAggregator {
    /// Open the channel and spawn the consumer.
    ///
    /// `known_sources` pre-seeds the per-source counts so that silent
    /// sources show up in the report with zero events.
    pub fn start<I>(capacity: usize, known_sources: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let (tx, mut rx) = mpsc::channel::<ErrorEvent>(capacity.max(1));
        let mut buffer = ReportBuffer::seeded(known_sources);

        let consumer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                obs::emit_error_event(&event);
                buffer.record(event);
            }
            debug!(total = buffer.total, "event consumer drained");
            buffer
        });

        Self {
            tx,
            live: Arc::new(AtomicUsize::new(0)),
            consumer,
        }
    }

    /// Hand out a new producer handle.
    pub fn sink(&self) -> EventSink {
        EventSink::new(self.tx.clone(), Arc::clone(&self.live))
    }

    /// Number of sinks not yet dropped.
    pub fn live_producers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Close the channel and wait for the consumer to drain it.
    ///
    /// Fails with [`AggregatorError::ProducersStillActive`] while any sink
    /// exists. In that case the consumer keeps running until the remaining
    /// sinks are dropped.
    pub async fn close(self) -> Result<ReportBuffer, AggregatorError> {
        let live = self.live_producers();
        if live > 0 {
            return Err(AggregatorError::ProducersStillActive { live });
        }

        let Self { tx, consumer, .. } = self;
        drop(tx);
        consumer
            .await
            .map_err(|e| AggregatorError::ConsumerFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counts_are_seeded_with_known_sources() {
        let aggregator = ErrorAggregator::start(
            8,
            vec!["/a.log".to_string(), "/b.log".to_string()],
        );
        let sink = aggregator.sink();
        sink.emit(ErrorEvent::new("/a.log", "ERROR one")).await.unwrap();
        drop(sink);

        let buffer = aggregator.close().await.unwrap();
        assert_eq!(buffer.total, 1);
        assert_eq!(buffer.counts["/a.log"], 1);
        assert_eq!(buffer.counts["/b.log"], 0);
        assert_eq!(buffer.active_sources(), vec!["/a.log"]);
    }

    #[tokio::test]
    async fn test_close_refused_while_sink_alive() {
        let aggregator = ErrorAggregator::start(4, Vec::new());
        let sink = aggregator.sink();
        let clone = sink.clone();
        assert_eq!(aggregator.live_producers(), 2);
        drop(clone);
        assert_eq!(aggregator.live_producers(), 1);

        let err = aggregator.close().await.unwrap_err();
        assert!(matches!(err, AggregatorError::ProducersStillActive { live: 1 }));

        // The consumer is still draining for the remaining producer.
        sink.emit(ErrorEvent::new("late", "still delivered")).await.unwrap();
    }

    #[tokio::test]
    async fn test_burst_through_tiny_channel_loses_nothing() {
        let aggregator = ErrorAggregator::start(2, Vec::new());

        let mut producers = Vec::new();
        for p in 0..4 {
            let sink = aggregator.sink();
            producers.push(tokio::spawn(async move {
                for i in 0..50 {
                    sink.emit(ErrorEvent::new(&format!("p{}", p), &format!("ERROR {}", i)))
                        .await
                        .unwrap();
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }

        let buffer = aggregator.close().await.unwrap();
        assert_eq!(buffer.total, 200);
        assert_eq!(buffer.events.len(), 200);
        assert!(buffer.counts.values().all(|n| *n == 50));
    }

    #[tokio::test]
    async fn test_events_from_one_producer_keep_order() {
        let aggregator = ErrorAggregator::start(1, Vec::new());
        let sink = aggregator.sink();
        for i in 0..10 {
            sink.emit(ErrorEvent::new("w", &i.to_string())).await.unwrap();
        }
        drop(sink);

        let buffer = aggregator.close().await.unwrap();
        let messages: Vec<&str> = buffer.events.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"]);
    }
}
