//! Shared test fixtures: an in-memory transport driven from the test body.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use ara_realtime_client::config::RealtimeConfig;
use ara_realtime_client::websocket::{Connector, TransportEvent, TransportLink};
use ara_realtime_client::{ConnectionEvent, TransportError};

/// Upper bound on any wait, in (usually paused) tokio time
pub const WAIT: Duration = Duration::from_secs(600);

/// What the next connection attempt does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accept,
    Fail,
    /// Never resolves
    Hang,
}

/// Server end of an accepted mock connection
pub struct ServerSide {
    frames: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl ServerSide {
    /// Deliver one JSON frame to the client
    pub fn push(&self, frame: Value) {
        self.push_raw(&frame.to_string());
    }

    pub fn push_raw(&self, raw: &str) {
        let _ = self.events.send(TransportEvent::Frame(raw.to_string()));
    }

    pub fn pong(&self) {
        self.push(serde_json::json!({"type": "pong", "timestamp": 0}));
    }

    /// Close from the server side
    pub fn close(&self, reason: &str) {
        let _ = self.events.send(TransportEvent::Closed {
            reason: Some(reason.to_string()),
        });
    }

    /// Next frame the client wrote, or None once the client dropped its end
    pub async fn next_frame(&mut self) -> Option<Value> {
        let raw = tokio::time::timeout(WAIT, self.frames.recv())
            .await
            .expect("timed out waiting for a client frame")?;
        Some(serde_json::from_str(&raw).expect("client wrote invalid JSON"))
    }

    /// Frames already written by the client
    pub fn drain_frames(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(raw) = self.frames.try_recv() {
            frames.push(serde_json::from_str(&raw).expect("client wrote invalid JSON"));
        }
        frames
    }

    /// True once the client has dropped its write half
    pub fn client_closed(&mut self) -> bool {
        matches!(
            self.frames.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        )
    }
}

/// Connector whose attempts follow a script, then a default outcome
pub struct MockConnector {
    attempts: AtomicU32,
    script: Mutex<VecDeque<Outcome>>,
    default: Outcome,
    accepted: mpsc::UnboundedSender<ServerSide>,
}

impl MockConnector {
    pub fn new(default: Outcome) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerSide>) {
        let (accepted, servers) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            attempts: AtomicU32::new(0),
            script: Mutex::new(VecDeque::new()),
            default,
            accepted,
        });
        (connector, servers)
    }

    pub fn script(&self, outcomes: impl IntoIterator<Item = Outcome>) {
        self.script.lock().unwrap().extend(outcomes);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &str) -> Result<TransportLink, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.default);

        match outcome {
            Outcome::Fail => Err(TransportError::Handshake("connection refused".into())),
            Outcome::Hang => std::future::pending().await,
            Outcome::Accept => {
                let (outbound, frames) = mpsc::unbounded_channel();
                let (events, inbound) = mpsc::unbounded_channel();
                let _ = self.accepted.send(ServerSide { frames, events });
                Ok(TransportLink { outbound, inbound })
            }
        }
    }
}

pub fn test_config() -> RealtimeConfig {
    RealtimeConfig::new("ws://realtime.test/ws")
}

pub async fn next_server(servers: &mut mpsc::UnboundedReceiver<ServerSide>) -> ServerSide {
    tokio::time::timeout(WAIT, servers.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("connector dropped")
}

/// Skip events until one matches
pub async fn wait_for<F>(events: &mut broadcast::Receiver<ConnectionEvent>, mut pred: F) -> ConnectionEvent
where
    F: FnMut(&ConnectionEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

pub fn frame_types(frames: &[Value]) -> Vec<String> {
    frames
        .iter()
        .map(|f| f["type"].as_str().unwrap_or_default().to_string())
        .collect()
}
