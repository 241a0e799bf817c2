//! Prometheus metrics for the realtime client.
//!
//! - Connection metrics (state, connect attempts, scheduled reconnects)
//! - Heartbeat metrics (timeouts)
//! - Frame metrics (sent by type, received, malformed)
//! - Dispatch metrics (deliveries, callback failures, queue depth)
//!
//! State and channel gauges carry a `url` label. Everything else is
//! process-wide and sums across managers.

mod helpers;

pub use helpers::{encode_metrics, ConnectionMetrics, DispatchMetrics, FrameMetrics, HeartbeatMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Histogram, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "ara_realtime";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Current connection state per server URL (0=disconnected, 1=connecting, 2=connected, 3=reconnecting, 4=closing)
    pub static ref CONNECTION_STATE: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_connection_state", METRIC_PREFIX),
        "Current connection state (0=disconnected, 1=connecting, 2=connected, 3=reconnecting, 4=closing)",
        &["url"]
    ).unwrap();

    /// Transport connection attempts
    pub static ref CONNECT_ATTEMPTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connect_attempts_total", METRIC_PREFIX),
        "Total transport connection attempts"
    ).unwrap();

    /// Successful transport opens
    pub static ref CONNECTIONS_OPENED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Total transport connections opened"
    ).unwrap();

    /// Reconnects scheduled by the backoff state machine
    pub static ref RECONNECTS_SCHEDULED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_reconnects_scheduled_total", METRIC_PREFIX),
        "Total reconnect attempts scheduled"
    ).unwrap();

    /// Times the reconnect budget ran out
    pub static ref RECONNECTS_EXHAUSTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_reconnects_exhausted_total", METRIC_PREFIX),
        "Total times reconnect attempts were exhausted"
    ).unwrap();

    /// Channels with at least one subscriber, per server URL
    pub static ref CHANNELS_ACTIVE: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_channels_active", METRIC_PREFIX),
        "Number of channels with at least one subscriber",
        &["url"]
    ).unwrap();

    // ============================================================================
    // Heartbeat Metrics
    // ============================================================================

    /// Pings sent
    pub static ref HEARTBEAT_PINGS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_heartbeat_pings_total", METRIC_PREFIX),
        "Total heartbeat pings sent"
    ).unwrap();

    /// Pongs not received in time
    pub static ref HEARTBEAT_TIMEOUTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_heartbeat_timeouts_total", METRIC_PREFIX),
        "Total heartbeat timeouts"
    ).unwrap();

    // ============================================================================
    // Frame Metrics
    // ============================================================================

    /// Outbound frames by type
    pub static ref FRAMES_SENT_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_frames_sent_total", METRIC_PREFIX),
        "Total frames sent",
        &["type"]
    ).unwrap();

    /// Inbound frames
    pub static ref FRAMES_RECEIVED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_frames_received_total", METRIC_PREFIX),
        "Total frames received"
    ).unwrap();

    /// Inbound frames dropped as malformed
    pub static ref FRAMES_MALFORMED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_frames_malformed_total", METRIC_PREFIX),
        "Total malformed frames dropped"
    ).unwrap();

    /// Application frames dropped because the outbound queue was full
    pub static ref OUTBOUND_DROPPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_outbound_dropped_total", METRIC_PREFIX),
        "Total queued outbound frames dropped due to the queue being full"
    ).unwrap();

    // ============================================================================
    // Dispatch Metrics
    // ============================================================================

    /// Callback invocations that completed
    pub static ref MESSAGES_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_delivered_total", METRIC_PREFIX),
        "Total successful subscriber callback invocations"
    ).unwrap();

    /// Callback invocations that panicked
    pub static ref CALLBACK_ERRORS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_callback_errors_total", METRIC_PREFIX),
        "Total subscriber callback failures"
    ).unwrap();

    /// Messages waiting in the inbound queue
    pub static ref MESSAGE_QUEUE_DEPTH: IntGauge = register_int_gauge!(
        format!("{}_message_queue_depth", METRIC_PREFIX),
        "Messages waiting in the inbound queue"
    ).unwrap();

    /// Messages handled per processing pass
    pub static ref DISPATCH_BATCH_SIZE: Histogram = register_histogram!(
        format!("{}_dispatch_batch_size", METRIC_PREFIX),
        "Messages dispatched per processing pass",
        vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0]
    ).unwrap();
}
