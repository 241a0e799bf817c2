//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    CALLBACK_ERRORS_TOTAL, CHANNELS_ACTIVE, CONNECTIONS_OPENED_TOTAL, CONNECTION_STATE,
    CONNECT_ATTEMPTS_TOTAL, DISPATCH_BATCH_SIZE, FRAMES_MALFORMED_TOTAL, FRAMES_RECEIVED_TOTAL,
    FRAMES_SENT_TOTAL, HEARTBEAT_PINGS_TOTAL, HEARTBEAT_TIMEOUTS_TOTAL, MESSAGES_DELIVERED_TOTAL,
    MESSAGE_QUEUE_DEPTH, OUTBOUND_DROPPED_TOTAL, RECONNECTS_EXHAUSTED_TOTAL,
    RECONNECTS_SCHEDULED_TOTAL,
};
use crate::connection_manager::ConnectionState;

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for connection lifecycle metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    /// Gauges are labelled by URL so managers sharing a process stay apart
    pub fn set_state(url: &str, state: ConnectionState) {
        CONNECTION_STATE.with_label_values(&[url]).set(state as i64);
    }

    pub fn record_connect_attempt() {
        CONNECT_ATTEMPTS_TOTAL.inc();
    }

    pub fn record_opened() {
        CONNECTIONS_OPENED_TOTAL.inc();
    }

    pub fn record_reconnect_scheduled() {
        RECONNECTS_SCHEDULED_TOTAL.inc();
    }

    pub fn record_exhausted() {
        RECONNECTS_EXHAUSTED_TOTAL.inc();
    }

    pub fn set_active_channels(url: &str, count: usize) {
        CHANNELS_ACTIVE.with_label_values(&[url]).set(count as i64);
    }
}

/// Helper struct for heartbeat metrics
pub struct HeartbeatMetrics;

impl HeartbeatMetrics {
    pub fn record_ping() {
        HEARTBEAT_PINGS_TOTAL.inc();
    }

    pub fn record_timeout() {
        HEARTBEAT_TIMEOUTS_TOTAL.inc();
    }
}

/// Helper struct for wire frame metrics
pub struct FrameMetrics;

impl FrameMetrics {
    /// Record an outbound frame by its `type` field
    pub fn record_sent(frame_type: &str) {
        FRAMES_SENT_TOTAL.with_label_values(&[frame_type]).inc();
    }

    pub fn record_received() {
        FRAMES_RECEIVED_TOTAL.inc();
    }

    pub fn record_malformed() {
        FRAMES_MALFORMED_TOTAL.inc();
    }

    pub fn record_outbound_dropped() {
        OUTBOUND_DROPPED_TOTAL.inc();
    }
}

/// Helper struct for dispatcher metrics
pub struct DispatchMetrics;

impl DispatchMetrics {
    pub fn record_batch(processed: usize, delivered: u64, failed: u64, remaining: usize) {
        DISPATCH_BATCH_SIZE.observe(processed as f64);
        MESSAGES_DELIVERED_TOTAL.inc_by(delivered);
        if failed > 0 {
            CALLBACK_ERRORS_TOTAL.inc_by(failed);
        }
        MESSAGE_QUEUE_DEPTH.set(remaining as i64);
    }

    pub fn set_queue_depth(depth: usize) {
        MESSAGE_QUEUE_DEPTH.set(depth as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics_includes_prefix() {
        FrameMetrics::record_sent("ping");
        ConnectionMetrics::record_connect_attempt();

        let text = encode_metrics().unwrap();
        assert!(text.contains("ara_realtime_frames_sent_total"));
        assert!(text.contains("ara_realtime_connect_attempts_total"));
    }

    #[test]
    fn test_state_gauges_kept_per_url() {
        let a = "ws://metrics-a.test/ws";
        let b = "ws://metrics-b.test/ws";
        ConnectionMetrics::set_state(a, ConnectionState::Connected);
        ConnectionMetrics::set_state(b, ConnectionState::Reconnecting);
        ConnectionMetrics::set_active_channels(a, 3);
        ConnectionMetrics::set_active_channels(b, 1);

        assert_eq!(CONNECTION_STATE.with_label_values(&[a]).get(), 2);
        assert_eq!(CONNECTION_STATE.with_label_values(&[b]).get(), 3);
        assert_eq!(CHANNELS_ACTIVE.with_label_values(&[a]).get(), 3);
        assert_eq!(CHANNELS_ACTIVE.with_label_values(&[b]).get(), 1);
    }
}
