//! Client-side connection manager.
//!
//! [`ConnectionManager`] is a cheap, cloneable handle to a single background
//! task that owns the WebSocket connection, its channel subscriptions and the
//! reconnect state machine.

mod actor;
mod backoff;
pub(crate) mod events;
mod heartbeat;
mod registry;
mod state;
mod stats;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_stream::wrappers::BroadcastStream;

use actor::{Command, ConnectionActor};
use crate::config::RealtimeConfig;
use crate::error::{ClientError, Result};
use crate::websocket::{Connector, InboundMessage, WebSocketConnector};

pub use backoff::{BackoffConfig, ReconnectBackoff};
pub use events::{CloseReason, ConnectionEvent, EventCallback, EventKind, ListenerId};
pub use heartbeat::{Heartbeat, HeartbeatTick};
pub use registry::{ChannelCallback, ChannelRegistry, SubscriberId};
pub use state::ConnectionState;
pub use stats::{ChannelInfo, ConnectionStats};

/// Buffered events per broadcast receiver before it starts lagging
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Handle to the connection task. Clones share one connection.
///
/// The task stops once every `ConnectionManager` clone has been dropped.
#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
    config: Arc<RealtimeConfig>,
}

impl ConnectionManager {
    /// Create a manager that speaks WebSocket to `config.url`.
    ///
    /// Must be called inside a tokio runtime. Nothing connects until
    /// [`connect`](Self::connect) is called.
    pub fn new(config: RealtimeConfig) -> Result<Self> {
        let connector = WebSocketConnector::new(config.connect_timeout());
        Self::with_connector(config, Arc::new(connector))
    }

    /// Create a manager over a custom transport
    pub fn with_connector(config: RealtimeConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, status) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let actor = ConnectionActor::new(
            config.clone(),
            connector,
            command_rx,
            state_tx,
            events.clone(),
        );
        tokio::spawn(actor.run());

        tracing::info!(
            url = %config.url,
            max_reconnect_attempts = config.max_reconnect_attempts,
            "Connection manager created"
        );

        Ok(Self {
            commands,
            status,
            events,
            config: Arc::new(config),
        })
    }

    /// Open the connection, or join the attempt already in flight.
    ///
    /// Resolves once the transport is open. A failed attempt resolves with
    /// its error while the manager keeps retrying in the background.
    pub async fn connect(&self) -> Result<()> {
        let (respond, rx) = oneshot::channel();
        self.command(Command::Connect { respond })?;
        rx.await.map_err(|_| ClientError::ManagerClosed)?
    }

    /// Close the connection and forget every subscription.
    ///
    /// No reconnect follows. Pending `connect()` calls fail with
    /// [`ClientError::Disconnected`].
    pub fn disconnect(&self) {
        if self.command(Command::Disconnect).is_err() {
            tracing::debug!("disconnect() after connection task stopped");
        }
    }

    /// Register a callback for `channel`.
    ///
    /// The first subscriber of a channel sends a subscribe frame when
    /// connected; otherwise the channel is subscribed on the next open.
    pub fn subscribe<F>(&self, channel: impl Into<String>, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Value, &InboundMessage) + Send + Sync + 'static,
    {
        let channel = channel.into();
        let id = SubscriberId::new();

        if self
            .command(Command::Subscribe {
                channel: channel.clone(),
                id,
                callback: Arc::new(callback),
            })
            .is_err()
        {
            tracing::warn!(channel = %channel, "subscribe() after connection task stopped");
        }

        SubscriptionHandle {
            channel,
            id,
            commands: self.commands.downgrade(),
        }
    }

    /// Like [`subscribe`](Self::subscribe), decoding each payload into `T`.
    ///
    /// Payloads that do not decode are logged and skipped.
    pub fn subscribe_typed<T, F>(&self, channel: impl Into<String>, callback: F) -> SubscriptionHandle
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let channel = channel.into();
        let name = channel.clone();

        self.subscribe(channel, move |_, message| match message.payload_as::<T>() {
            Ok(value) => callback(value),
            Err(e) => {
                tracing::warn!(
                    channel = %name,
                    message_type = %message.message_type,
                    error = %e,
                    "Payload did not match subscriber type"
                );
            }
        })
    }

    /// Remove one callback. The last callback of a channel sends an unsubscribe frame.
    pub fn unsubscribe(&self, channel: &str, id: SubscriberId) {
        let _ = self.command(Command::Unsubscribe {
            channel: channel.to_string(),
            id,
        });
    }

    /// Send an application frame, queueing it while disconnected
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<()> {
        let frame = serde_json::to_string(message).map_err(|e| ClientError::Encode(e.to_string()))?;
        self.command(Command::Send { frame })
    }

    /// Current lifecycle state
    pub fn status(&self) -> ConnectionState {
        *self.status.borrow()
    }

    /// Receiver that observes every state change
    pub fn watch_status(&self) -> watch::Receiver<ConnectionState> {
        self.status.clone()
    }

    /// Point-in-time statistics
    pub async fn stats(&self) -> Result<ConnectionStats> {
        let (respond, rx) = oneshot::channel();
        self.command(Command::Stats { respond })?;
        rx.await.map_err(|_| ClientError::ManagerClosed)
    }

    /// Register a synchronous listener for one kind of event.
    ///
    /// Listeners run on the connection task and must not block.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        let id = ListenerId::new();
        let _ = self.command(Command::On {
            kind,
            id,
            callback: Arc::new(callback),
        });
        id
    }

    pub fn off(&self, id: ListenerId) {
        let _ = self.command(Command::Off { id });
    }

    /// Receive every event from now on
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// [`events`](Self::events) as a `Stream`
    pub fn event_stream(&self) -> BroadcastStream<ConnectionEvent> {
        BroadcastStream::new(self.events.subscribe())
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::ManagerClosed)
    }
}

/// Returned by [`ConnectionManager::subscribe`].
///
/// Dropping the handle leaves the subscription in place; call
/// [`unsubscribe`](Self::unsubscribe) to remove it. The handle does not keep
/// the connection task alive.
pub struct SubscriptionHandle {
    channel: String,
    id: SubscriberId,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .finish()
    }
}

impl SubscriptionHandle {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn unsubscribe(self) {
        if let Some(commands) = self.commands.upgrade() {
            let _ = commands.send(Command::Unsubscribe {
                channel: self.channel,
                id: self.id,
            });
        }
    }
}
