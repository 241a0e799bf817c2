//! Inbound frame queue and per-channel fan-out.
//!
//! Frames are parsed and appended in arrival order; each processing pass
//! drains at most `batch_size` of them so a burst never turns into one long
//! synchronous run on the connection task.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::Serialize;

use crate::connection_manager::events::panic_message;
use crate::connection_manager::ChannelRegistry;
use crate::error::ClientError;
use crate::metrics::{DispatchMetrics, FrameMetrics};
use crate::websocket::{InboundMessage, ServerFrame};

/// Default cap on messages handled per processing pass
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// What happened to one raw frame
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Heartbeat reply; never queued
    Pong { timestamp: Option<i64> },
    /// Appended to the queue
    Queued,
    /// Not a valid envelope; dropped
    Malformed,
}

/// Result of one processing pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    /// Messages removed from the queue
    pub processed: usize,
    /// Callback invocations that returned normally
    pub delivered: u64,
    /// Callback invocations that panicked
    pub failed: u64,
}

/// Counters for the lifetime of the dispatcher
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    pub frames_received: u64,
    pub frames_malformed: u64,
    pub delivered: u64,
    pub callback_errors: u64,
}

pub struct MessageDispatcher {
    queue: VecDeque<InboundMessage>,
    batch_size: usize,
    stats: DispatcherStats,
}

impl MessageDispatcher {
    pub fn new(batch_size: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            batch_size: batch_size.max(1),
            stats: DispatcherStats::default(),
        }
    }

    /// Parse a raw frame and queue it unless it is a pong or malformed
    pub fn ingest(&mut self, raw: &str) -> IngestOutcome {
        self.stats.frames_received += 1;
        FrameMetrics::record_received();

        match ServerFrame::parse(raw) {
            Ok(ServerFrame::Pong { timestamp }) => IngestOutcome::Pong { timestamp },
            Ok(ServerFrame::Message(message)) => {
                self.queue.push_back(message);
                DispatchMetrics::set_queue_depth(self.queue.len());
                IngestOutcome::Queued
            }
            Err(e) => {
                self.stats.frames_malformed += 1;
                FrameMetrics::record_malformed();
                tracing::warn!(error = %e, len = raw.len(), "Dropping malformed frame");
                IngestOutcome::Malformed
            }
        }
    }

    /// Drain up to `batch_size` messages from the head of the queue.
    ///
    /// Every callback for a message runs before the next message is touched.
    /// `on_message` is called once per message after its channel callbacks.
    pub fn process_batch<F>(&mut self, registry: &ChannelRegistry, mut on_message: F) -> BatchResult
    where
        F: FnMut(&InboundMessage),
    {
        let take = self.queue.len().min(self.batch_size);
        let mut result = BatchResult::default();

        for message in self.queue.drain(..take) {
            result.processed += 1;

            if let Some(channel) = message.channel.as_deref() {
                for callback in registry.callbacks(channel) {
                    match catch_unwind(AssertUnwindSafe(|| callback(&message.payload, &message))) {
                        Ok(()) => result.delivered += 1,
                        Err(panic) => {
                            result.failed += 1;
                            let error = ClientError::Callback {
                                channel: channel.to_string(),
                                message: panic_message(&*panic),
                            };
                            tracing::error!(channel = %channel, error = %error, "Subscriber callback failed");
                        }
                    }
                }
            }

            on_message(&message);
        }

        self.stats.delivered += result.delivered;
        self.stats.callback_errors += result.failed;
        if result.processed > 0 {
            DispatchMetrics::record_batch(
                result.processed,
                result.delivered,
                result.failed,
                self.queue.len(),
            );
        }

        result
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drop everything still waiting
    pub fn clear(&mut self) {
        self.queue.clear();
        DispatchMetrics::set_queue_depth(0);
    }

    pub fn stats(&self) -> &DispatcherStats {
        &self.stats
    }
}

impl Default for MessageDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_manager::{ChannelCallback, SubscriberId};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    fn recorder(log: &Arc<Mutex<Vec<Value>>>) -> ChannelCallback {
        let log = log.clone();
        Arc::new(move |payload, _| log.lock().unwrap().push(payload.clone()))
    }

    fn frame(channel: &str, n: u32) -> String {
        json!({"type": "update", "channel": channel, "payload": {"n": n}}).to_string()
    }

    #[test]
    fn test_pong_is_not_queued() {
        let mut dispatcher = MessageDispatcher::default();
        assert_eq!(
            dispatcher.ingest(r#"{"type":"pong","timestamp":5}"#),
            IngestOutcome::Pong { timestamp: Some(5) }
        );
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn test_malformed_frames_are_counted_and_dropped() {
        let mut dispatcher = MessageDispatcher::default();
        assert_eq!(dispatcher.ingest("{not json"), IngestOutcome::Malformed);
        assert_eq!(dispatcher.ingest(r#"{"payload":1}"#), IngestOutcome::Malformed);
        assert_eq!(dispatcher.ingest(&frame("agents", 1)), IngestOutcome::Queued);

        assert_eq!(dispatcher.len(), 1);
        assert_eq!(dispatcher.stats().frames_received, 3);
        assert_eq!(dispatcher.stats().frames_malformed, 2);
    }

    #[test]
    fn test_routes_only_to_matching_channel() {
        let mut registry = ChannelRegistry::new();
        let agents = Arc::new(Mutex::new(Vec::new()));
        let market = Arc::new(Mutex::new(Vec::new()));
        registry.insert("agents", SubscriberId::new(), recorder(&agents));
        registry.insert("market_data", SubscriberId::new(), recorder(&market));

        let mut dispatcher = MessageDispatcher::default();
        dispatcher.ingest(r#"{"type":"agents","channel":"agents","payload":{"id":1}}"#);
        let result = dispatcher.process_batch(&registry, |_| {});

        assert_eq!(result.processed, 1);
        assert_eq!(result.delivered, 1);
        assert_eq!(*agents.lock().unwrap(), vec![json!({"id": 1})]);
        assert!(market.lock().unwrap().is_empty());
    }

    #[test]
    fn test_batch_is_bounded_and_fifo() {
        let mut registry = ChannelRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.insert("ticks", SubscriberId::new(), recorder(&log));

        let mut dispatcher = MessageDispatcher::new(50);
        for n in 0..120 {
            dispatcher.ingest(&frame("ticks", n));
        }

        assert_eq!(dispatcher.process_batch(&registry, |_| {}).processed, 50);
        assert_eq!(dispatcher.len(), 70);
        assert_eq!(dispatcher.process_batch(&registry, |_| {}).processed, 50);
        assert_eq!(dispatcher.process_batch(&registry, |_| {}).processed, 20);
        assert!(dispatcher.is_empty());
        assert_eq!(dispatcher.process_batch(&registry, |_| {}), BatchResult::default());

        let seen: Vec<u64> = log
            .lock()
            .unwrap()
            .iter()
            .map(|v| v["n"].as_u64().unwrap())
            .collect();
        assert_eq!(seen, (0..120).collect::<Vec<u64>>());
    }

    #[test]
    fn test_panicking_callback_is_isolated() {
        let mut registry = ChannelRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.insert("agents", SubscriberId::new(), Arc::new(|_, _| panic!("subscriber bug")));
        registry.insert("agents", SubscriberId::new(), recorder(&log));

        let mut dispatcher = MessageDispatcher::default();
        dispatcher.ingest(&frame("agents", 1));
        dispatcher.ingest(&frame("agents", 2));
        let result = dispatcher.process_batch(&registry, |_| {});

        assert_eq!(result.processed, 2);
        assert_eq!(result.delivered, 2);
        assert_eq!(result.failed, 2);
        assert_eq!(log.lock().unwrap().len(), 2);
        assert_eq!(dispatcher.stats().callback_errors, 2);
    }

    #[test]
    fn test_general_listener_sees_every_message() {
        let registry = ChannelRegistry::new();
        let mut dispatcher = MessageDispatcher::default();
        dispatcher.ingest(&frame("agents", 1));
        dispatcher.ingest(r#"{"type":"announcement","payload":"hello"}"#);

        let mut types = Vec::new();
        dispatcher.process_batch(&registry, |msg| types.push(msg.message_type.clone()));
        assert_eq!(types, vec!["update", "announcement"]);
    }

    #[test]
    fn test_clear_empties_queue() {
        let mut dispatcher = MessageDispatcher::default();
        dispatcher.ingest(&frame("agents", 1));
        dispatcher.clear();
        assert!(dispatcher.is_empty());
    }
}
