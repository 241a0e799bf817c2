//! Connection statistics and info structures

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ConnectionState;

/// Connection statistics
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub status: ConnectionState,
    pub reconnect_attempts: u32,
    /// Channels with at least one subscriber
    pub subscribers_count: usize,
    /// Callbacks across all channels
    pub callback_count: usize,
    pub message_queue_length: usize,
    pub outbound_queue_length: usize,
    pub ping_interval_ms: u64,
    pub last_ping_sent: Option<DateTime<Utc>>,
    pub last_pong_received: Option<DateTime<Utc>>,
    pub frames_received: u64,
    pub frames_malformed: u64,
    pub callback_errors: u64,
    pub channels: Vec<ChannelInfo>,
}

/// Channel information
#[derive(Debug, Clone, Serialize)]
pub struct ChannelInfo {
    pub name: String,
    pub subscriber_count: usize,
}
