//! Lifecycle events and their listeners

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::ClientError;
use crate::websocket::InboundMessage;

/// Why a `Close` event fired
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `disconnect()` was called
    Requested,
    /// The transport went away; a reconnect may follow
    TransportClosed { reason: Option<String> },
    /// Reconnect attempts ran out; the manager is now disconnected
    Exhausted { attempts: u32 },
}

/// Events emitted by the connection manager
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Open,
    Close(CloseReason),
    Error(ClientError),
    Message(Arc<InboundMessage>),
    Reconnect { attempt: u32, delay: Duration },
}

impl ConnectionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ConnectionEvent::Open => EventKind::Open,
            ConnectionEvent::Close(_) => EventKind::Close,
            ConnectionEvent::Error(_) => EventKind::Error,
            ConnectionEvent::Message(_) => EventKind::Message,
            ConnectionEvent::Reconnect { .. } => EventKind::Reconnect,
        }
    }
}

/// Event names accepted by `on()`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Close,
    Error,
    Message,
    Reconnect,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Open => "open",
            EventKind::Close => "close",
            EventKind::Error => "error",
            EventKind::Message => "message",
            EventKind::Reconnect => "reconnect",
        }
    }
}

pub type EventCallback = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

/// Identifies a listener registered with `on()`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Fans events out to synchronous listeners and async broadcast receivers
pub(crate) struct EventBus {
    listeners: HashMap<EventKind, Vec<(ListenerId, EventCallback)>>,
    tx: broadcast::Sender<ConnectionEvent>,
}

impl EventBus {
    pub fn new(tx: broadcast::Sender<ConnectionEvent>) -> Self {
        Self {
            listeners: HashMap::new(),
            tx,
        }
    }

    pub fn add(&mut self, kind: EventKind, id: ListenerId, callback: EventCallback) {
        self.listeners.entry(kind).or_default().push((id, callback));
    }

    pub fn remove(&mut self, id: ListenerId) {
        for listeners in self.listeners.values_mut() {
            listeners.retain(|(lid, _)| *lid != id);
        }
        self.listeners.retain(|_, l| !l.is_empty());
    }

    /// Whether anyone would observe a `Message` event
    pub fn wants_messages(&self) -> bool {
        self.listeners.contains_key(&EventKind::Message) || self.tx.receiver_count() > 0
    }

    pub fn emit(&self, event: ConnectionEvent) {
        if let Some(listeners) = self.listeners.get(&event.kind()) {
            for (id, listener) in listeners {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                    tracing::error!(
                        event = event.kind().as_str(),
                        listener_id = ?id,
                        error = %panic_message(&*panic),
                        "Event listener panicked"
                    );
                }
            }
        }
        // No receivers is fine
        let _ = self.tx.send(event);
    }
}

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
