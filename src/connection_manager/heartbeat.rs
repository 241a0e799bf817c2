//! Ping/pong liveness tracking.
//!
//! Holds the deadlines only; the connection actor owns the timers and sends
//! the frames.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// What the next heartbeat deadline means
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatTick {
    /// Time to send a ping
    Ping,
    /// A ping went unanswered
    PongTimeout,
}

#[derive(Debug)]
pub struct Heartbeat {
    interval: Duration,
    timeout: Duration,
    next_ping: Option<Instant>,
    pong_deadline: Option<Instant>,
    last_ping_sent: Option<DateTime<Utc>>,
    last_pong_received: Option<DateTime<Utc>>,
}

impl Heartbeat {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            next_ping: None,
            pong_deadline: None,
            last_ping_sent: None,
            last_pong_received: None,
        }
    }

    /// Begin pinging one interval from `now`
    pub fn start(&mut self, now: Instant) {
        self.next_ping = Some(now + self.interval);
        self.pong_deadline = None;
    }

    pub fn stop(&mut self) {
        self.next_ping = None;
        self.pong_deadline = None;
    }

    pub fn is_running(&self) -> bool {
        self.next_ping.is_some()
    }

    /// Record a sent ping. Arms the pong deadline unless one is already pending.
    pub fn on_ping_sent(&mut self, now: Instant) {
        self.last_ping_sent = Some(Utc::now());
        self.next_ping = Some(now + self.interval);
        if self.pong_deadline.is_none() {
            self.pong_deadline = Some(now + self.timeout);
        }
    }

    pub fn on_pong(&mut self) {
        self.last_pong_received = Some(Utc::now());
        self.pong_deadline = None;
    }

    pub fn awaiting_pong(&self) -> bool {
        self.pong_deadline.is_some()
    }

    /// Earliest pending deadline; a pong timeout wins ties
    pub fn next_deadline(&self) -> Option<(Instant, HeartbeatTick)> {
        match (self.pong_deadline, self.next_ping) {
            (Some(pong), Some(ping)) if ping < pong => Some((ping, HeartbeatTick::Ping)),
            (Some(pong), _) => Some((pong, HeartbeatTick::PongTimeout)),
            (None, Some(ping)) => Some((ping, HeartbeatTick::Ping)),
            (None, None) => None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn last_ping_sent(&self) -> Option<DateTime<Utc>> {
        self.last_ping_sent
    }

    pub fn last_pong_received(&self) -> Option<DateTime<Utc>> {
        self.last_pong_received
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat() -> Heartbeat {
        Heartbeat::new(Duration::from_secs(30), Duration::from_secs(5))
    }

    #[test]
    fn test_idle_until_started() {
        let hb = heartbeat();
        assert!(!hb.is_running());
        assert!(hb.next_deadline().is_none());
    }

    #[test]
    fn test_ping_then_pong_timeout() {
        let mut hb = heartbeat();
        let t0 = Instant::now();
        hb.start(t0);
        assert_eq!(hb.next_deadline(), Some((t0 + Duration::from_secs(30), HeartbeatTick::Ping)));

        let t1 = t0 + Duration::from_secs(30);
        hb.on_ping_sent(t1);
        assert!(hb.awaiting_pong());
        assert_eq!(
            hb.next_deadline(),
            Some((t1 + Duration::from_secs(5), HeartbeatTick::PongTimeout))
        );
        assert!(hb.last_ping_sent().is_some());
    }

    #[test]
    fn test_pong_clears_deadline() {
        let mut hb = heartbeat();
        let t0 = Instant::now();
        hb.start(t0);
        hb.on_ping_sent(t0 + Duration::from_secs(30));
        hb.on_pong();

        assert!(!hb.awaiting_pong());
        assert!(hb.last_pong_received().is_some());
        assert_eq!(
            hb.next_deadline(),
            Some((t0 + Duration::from_secs(60), HeartbeatTick::Ping))
        );
    }

    #[test]
    fn test_second_ping_keeps_original_deadline() {
        // Timeout longer than the interval: the first unanswered ping still counts
        let mut hb = Heartbeat::new(Duration::from_secs(1), Duration::from_secs(5));
        let t0 = Instant::now();
        hb.start(t0);
        hb.on_ping_sent(t0 + Duration::from_secs(1));
        hb.on_ping_sent(t0 + Duration::from_secs(2));

        assert_eq!(
            hb.next_deadline(),
            Some((t0 + Duration::from_secs(3), HeartbeatTick::Ping))
        );
        assert_eq!(hb.pong_deadline, Some(t0 + Duration::from_secs(6)));
    }

    #[test]
    fn test_stop_clears_everything() {
        let mut hb = heartbeat();
        let t0 = Instant::now();
        hb.start(t0);
        hb.on_ping_sent(t0);
        hb.stop();
        assert!(hb.next_deadline().is_none());
        assert!(!hb.awaiting_pong());
    }
}
