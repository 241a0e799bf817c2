//! The task that owns the connection.
//!
//! Every piece of mutable connection state lives here: lifecycle state,
//! reconnect budget, channel registry, inbound and outbound queues, the
//! heartbeat and the transport link. Public handles talk to it through
//! [`Command`]s, so exactly one thing happens at a time.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};

use super::backoff::{BackoffConfig, ReconnectBackoff};
use super::events::{CloseReason, ConnectionEvent, EventBus, EventCallback, EventKind, ListenerId};
use super::heartbeat::{Heartbeat, HeartbeatTick};
use super::registry::{ChannelCallback, ChannelRegistry, SubscriberId};
use super::stats::ConnectionStats;
use super::ConnectionState;
use crate::config::RealtimeConfig;
use crate::dispatcher::{IngestOutcome, MessageDispatcher};
use crate::error::{ClientError, Result, TransportError};
use crate::metrics::{ConnectionMetrics, FrameMetrics, HeartbeatMetrics};
use crate::websocket::{ClientFrame, Connector, TransportEvent, TransportLink};

type ConnectFuture = BoxFuture<'static, std::result::Result<TransportLink, TransportError>>;

/// Requests from public handles to the connection task
pub(crate) enum Command {
    Connect {
        respond: oneshot::Sender<Result<()>>,
    },
    Disconnect,
    Subscribe {
        channel: String,
        id: SubscriberId,
        callback: ChannelCallback,
    },
    Unsubscribe {
        channel: String,
        id: SubscriberId,
    },
    Send {
        frame: String,
    },
    On {
        kind: EventKind,
        id: ListenerId,
        callback: EventCallback,
    },
    Off {
        id: ListenerId,
    },
    Stats {
        respond: oneshot::Sender<ConnectionStats>,
    },
}

#[derive(Debug, Clone, Copy)]
enum Timer {
    Reconnect,
    Heartbeat(HeartbeatTick),
    CloseGrace,
}

pub(crate) struct ConnectionActor {
    config: RealtimeConfig,
    connector: Arc<dyn Connector>,
    commands: mpsc::UnboundedReceiver<Command>,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    should_reconnect: bool,
    backoff: ReconnectBackoff,
    outbound: Option<mpsc::UnboundedSender<String>>,
    inbound: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    pending_connect: Option<ConnectFuture>,
    connect_waiters: Vec<oneshot::Sender<Result<()>>>,
    reconnect_at: Option<Instant>,
    close_deadline: Option<Instant>,
    heartbeat: Heartbeat,
    registry: ChannelRegistry,
    dispatcher: MessageDispatcher,
    events: EventBus,
    outbound_queue: VecDeque<String>,
}

impl ConnectionActor {
    pub fn new(
        config: RealtimeConfig,
        connector: Arc<dyn Connector>,
        commands: mpsc::UnboundedReceiver<Command>,
        state_tx: watch::Sender<ConnectionState>,
        event_tx: broadcast::Sender<ConnectionEvent>,
    ) -> Self {
        let backoff = ReconnectBackoff::new(BackoffConfig {
            base_delay: config.reconnect_interval(),
            max_attempts: config.max_reconnect_attempts,
            jitter_factor: config.reconnect_jitter,
        });
        let heartbeat = Heartbeat::new(config.ping_interval(), config.ping_timeout());
        let dispatcher = MessageDispatcher::new(config.batch_size);

        Self {
            config,
            connector,
            commands,
            state: ConnectionState::Disconnected,
            state_tx,
            should_reconnect: false,
            backoff,
            outbound: None,
            inbound: None,
            pending_connect: None,
            connect_waiters: Vec::new(),
            reconnect_at: None,
            close_deadline: None,
            heartbeat,
            registry: ChannelRegistry::new(),
            dispatcher,
            events: EventBus::new(event_tx),
            outbound_queue: VecDeque::new(),
        }
    }

    /// Run until every public handle is dropped
    pub async fn run(mut self) {
        tracing::debug!(url = %self.config.url, "Connection task started");

        loop {
            let timer = self.next_timer();

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                result = poll_connect(&mut self.pending_connect) => {
                    self.pending_connect = None;
                    self.on_connect_result(result);
                }
                event = next_transport_event(&mut self.inbound) => {
                    self.on_transport_event(event);
                }
                _ = sleep_until_deadline(timer.map(|(at, _)| at)) => {
                    if let Some((_, timer)) = timer {
                        self.on_timer(timer);
                    }
                }
                // One bounded batch per turn, so commands and frames interleave with bursts
                _ = tokio::task::yield_now(), if !self.dispatcher.is_empty() => {
                    self.process_batch();
                }
            }
        }

        self.pending_connect = None;
        self.outbound = None;
        self.inbound = None;
        tracing::debug!("Connection task stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { respond } => self.connect(respond),
            Command::Disconnect => self.disconnect(),
            Command::Subscribe {
                channel,
                id,
                callback,
            } => self.subscribe(channel, id, callback),
            Command::Unsubscribe { channel, id } => self.unsubscribe(&channel, id),
            Command::Send { frame } => self.send_application_frame(frame),
            Command::On { kind, id, callback } => self.events.add(kind, id, callback),
            Command::Off { id } => self.events.remove(id),
            Command::Stats { respond } => {
                let _ = respond.send(self.stats());
            }
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    fn connect(&mut self, respond: oneshot::Sender<Result<()>>) {
        match self.state {
            ConnectionState::Connected => {
                let _ = respond.send(Ok(()));
            }
            ConnectionState::Connecting => {
                tracing::debug!("Connect requested while connecting; joining in-flight attempt");
                self.connect_waiters.push(respond);
            }
            ConnectionState::Reconnecting => {
                // Skip the rest of the backoff delay but keep the attempt count
                self.reconnect_at = None;
                self.connect_waiters.push(respond);
                self.begin_connect();
            }
            ConnectionState::Disconnected | ConnectionState::Closing => {
                if self.state == ConnectionState::Closing {
                    self.finish_close();
                }
                self.should_reconnect = true;
                self.backoff.reset();
                self.connect_waiters.push(respond);
                self.begin_connect();
            }
        }
    }

    fn begin_connect(&mut self) {
        let connector = self.connector.clone();
        let url = self.config.url.clone();

        tracing::info!(
            url = %url,
            reconnect_attempt = self.backoff.attempts(),
            "Connecting"
        );
        ConnectionMetrics::record_connect_attempt();

        self.pending_connect = Some(Box::pin(async move { connector.connect(&url).await }));
        self.set_state(ConnectionState::Connecting);
    }

    fn on_connect_result(&mut self, result: std::result::Result<TransportLink, TransportError>) {
        match result {
            Ok(link) => self.on_open(link),
            Err(e) => {
                tracing::warn!(
                    url = %self.config.url,
                    error = %e,
                    reconnect_attempt = self.backoff.attempts(),
                    "Connection attempt failed"
                );
                let error = ClientError::from(e);
                self.events.emit(ConnectionEvent::Error(error.clone()));
                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(Err(error.clone()));
                }
                self.on_transport_lost(Some(error.to_string()));
            }
        }
    }

    fn on_open(&mut self, link: TransportLink) {
        let (outbound, inbound) = link.into_parts();
        self.outbound = Some(outbound);
        self.inbound = Some(inbound);

        self.backoff.reset();
        self.set_state(ConnectionState::Connected);
        self.heartbeat.start(Instant::now());
        ConnectionMetrics::record_opened();
        tracing::info!(url = %self.config.url, "Connection established");

        // Frames sent while we were away go out first, in order
        while let Some(frame) = self.outbound_queue.pop_front() {
            if let Err(frame) = self.write(frame, "application") {
                self.outbound_queue.push_front(frame);
                break;
            }
        }

        let channels: Vec<String> = self.registry.channels().map(str::to_owned).collect();
        if !channels.is_empty() {
            tracing::info!(count = channels.len(), "Resubscribing channels");
        }
        for channel in channels {
            self.send_frame(&ClientFrame::subscribe(channel));
        }

        self.events.emit(ConnectionEvent::Open);
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    /// The transport is gone: schedule a retry or give up
    fn on_transport_lost(&mut self, reason: Option<String>) {
        self.drop_transport();
        self.events
            .emit(ConnectionEvent::Close(CloseReason::TransportClosed { reason }));

        if !self.should_reconnect {
            self.set_state(ConnectionState::Disconnected);
            return;
        }

        match self.backoff.next_delay() {
            Some(delay) => {
                let attempt = self.backoff.attempts();
                self.reconnect_at = Some(Instant::now() + delay);
                self.set_state(ConnectionState::Reconnecting);
                ConnectionMetrics::record_reconnect_scheduled();

                tracing::info!(
                    attempt = attempt,
                    max_attempts = self.config.max_reconnect_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnect scheduled"
                );
                self.events
                    .emit(ConnectionEvent::Reconnect { attempt, delay });
            }
            None => {
                let attempts = self.backoff.attempts();
                self.should_reconnect = false;
                self.set_state(ConnectionState::Disconnected);
                ConnectionMetrics::record_exhausted();

                let error = ClientError::ConnectionExhausted { attempts };
                tracing::error!(url = %self.config.url, error = %error, "Giving up on reconnecting");
                self.events
                    .emit(ConnectionEvent::Close(CloseReason::Exhausted { attempts }));
            }
        }
    }

    fn disconnect(&mut self) {
        tracing::info!(url = %self.config.url, state = %self.state, "Disconnect requested");

        self.should_reconnect = false;
        self.reconnect_at = None;
        self.pending_connect = None;
        self.heartbeat.stop();
        self.backoff.reset();

        self.registry.clear();
        ConnectionMetrics::set_active_channels(&self.config.url, 0);
        self.dispatcher.clear();
        self.outbound_queue.clear();

        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(ClientError::Disconnected));
        }

        match self.state {
            ConnectionState::Disconnected | ConnectionState::Closing => {}
            _ => {
                // Dropping the sender makes the transport close its socket
                self.outbound = None;
                if self.inbound.is_some() {
                    self.close_deadline = Some(Instant::now() + self.heartbeat.timeout());
                    self.set_state(ConnectionState::Closing);
                } else {
                    self.finish_close();
                }
            }
        }
    }

    fn finish_close(&mut self) {
        self.outbound = None;
        self.inbound = None;
        self.close_deadline = None;
        self.set_state(ConnectionState::Disconnected);

        tracing::info!(url = %self.config.url, "Connection closed");
        self.events
            .emit(ConnectionEvent::Close(CloseReason::Requested));
    }

    fn drop_transport(&mut self) {
        self.outbound = None;
        self.inbound = None;
        self.heartbeat.stop();
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        tracing::debug!(from = %self.state, to = %state, "Connection state changed");
        self.state = state;
        self.state_tx.send_replace(state);
        ConnectionMetrics::set_state(&self.config.url, state);
    }

    // ------------------------------------------------------------------------
    // Transport and timers
    // ------------------------------------------------------------------------

    fn on_transport_event(&mut self, event: TransportEvent) {
        if self.state == ConnectionState::Closing {
            match event {
                TransportEvent::Frame(_) => {}
                TransportEvent::Closed { .. } | TransportEvent::Error(_) => self.finish_close(),
            }
            return;
        }

        match event {
            TransportEvent::Frame(text) => {
                if let IngestOutcome::Pong { .. } = self.dispatcher.ingest(&text) {
                    self.heartbeat.on_pong();
                }
            }
            TransportEvent::Closed { reason } => {
                tracing::warn!(url = %self.config.url, reason = ?reason, "Transport closed");
                self.on_transport_lost(reason);
            }
            TransportEvent::Error(message) => {
                tracing::warn!(url = %self.config.url, error = %message, "Transport error");
                self.events.emit(ConnectionEvent::Error(ClientError::Transport(
                    TransportError::Io(message.clone()),
                )));
                self.on_transport_lost(Some(message));
            }
        }
    }

    fn next_timer(&self) -> Option<(Instant, Timer)> {
        [
            self.reconnect_at.map(|at| (at, Timer::Reconnect)),
            self.close_deadline.map(|at| (at, Timer::CloseGrace)),
            self.heartbeat
                .next_deadline()
                .map(|(at, tick)| (at, Timer::Heartbeat(tick))),
        ]
        .into_iter()
        .flatten()
        .min_by_key(|(at, _)| *at)
    }

    fn on_timer(&mut self, timer: Timer) {
        match timer {
            Timer::Reconnect => {
                self.reconnect_at = None;
                if self.state == ConnectionState::Reconnecting {
                    self.begin_connect();
                }
            }
            Timer::CloseGrace => {
                tracing::debug!("Transport did not confirm close in time");
                self.finish_close();
            }
            Timer::Heartbeat(HeartbeatTick::Ping) => self.send_ping(),
            Timer::Heartbeat(HeartbeatTick::PongTimeout) => self.on_heartbeat_timeout(),
        }
    }

    fn send_ping(&mut self) {
        self.send_frame(&ClientFrame::ping(Utc::now().timestamp_millis()));
        self.heartbeat.on_ping_sent(Instant::now());
        HeartbeatMetrics::record_ping();
    }

    fn on_heartbeat_timeout(&mut self) {
        let timeout = self.heartbeat.timeout();
        HeartbeatMetrics::record_timeout();
        tracing::warn!(
            url = %self.config.url,
            timeout_ms = timeout.as_millis() as u64,
            "No pong received, treating connection as dead"
        );

        let error = ClientError::HeartbeatTimeout(timeout);
        self.events.emit(ConnectionEvent::Error(error.clone()));
        self.on_transport_lost(Some(error.to_string()));
    }

    // ------------------------------------------------------------------------
    // Channels and frames
    // ------------------------------------------------------------------------

    fn subscribe(&mut self, channel: String, id: SubscriberId, callback: ChannelCallback) {
        let first = self.registry.insert(&channel, id, callback);
        ConnectionMetrics::set_active_channels(&self.config.url, self.registry.channel_count());

        if first && self.state.is_connected() {
            self.send_frame(&ClientFrame::subscribe(channel));
        }
    }

    fn unsubscribe(&mut self, channel: &str, id: SubscriberId) {
        let emptied = self.registry.remove(channel, id);
        ConnectionMetrics::set_active_channels(&self.config.url, self.registry.channel_count());

        if emptied && self.state.is_connected() {
            self.send_frame(&ClientFrame::unsubscribe(channel));
        }
    }

    fn send_application_frame(&mut self, frame: String) {
        let frame = if self.state.is_connected() {
            match self.write(frame, "application") {
                Ok(()) => return,
                Err(frame) => frame,
            }
        } else {
            frame
        };

        if self.config.max_outbound_queue == 0 {
            FrameMetrics::record_outbound_dropped();
            tracing::warn!("Not connected and outbound queue disabled; frame dropped");
            return;
        }
        if self.outbound_queue.len() >= self.config.max_outbound_queue {
            self.outbound_queue.pop_front();
            FrameMetrics::record_outbound_dropped();
            tracing::warn!(
                max = self.config.max_outbound_queue,
                "Outbound queue full; dropped oldest frame"
            );
        }
        self.outbound_queue.push_back(frame);
    }

    fn send_frame(&mut self, frame: &ClientFrame) {
        match frame.to_json() {
            Ok(text) => {
                let _ = self.write(text, frame.frame_type());
            }
            Err(e) => {
                tracing::error!(error = %e, frame_type = frame.frame_type(), "Failed to serialize frame");
            }
        }
    }

    /// Hand a frame to the transport writer. Gives the frame back if there is none.
    fn write(&self, text: String, frame_type: &str) -> std::result::Result<(), String> {
        let Some(outbound) = &self.outbound else {
            return Err(text);
        };

        match outbound.send(text) {
            Ok(()) => {
                FrameMetrics::record_sent(frame_type);
                Ok(())
            }
            Err(mpsc::error::SendError(text)) => {
                tracing::debug!(frame_type = frame_type, "Transport writer gone; frame not sent");
                Err(text)
            }
        }
    }

    fn process_batch(&mut self) {
        let events = &self.events;
        let notify = events.wants_messages();

        self.dispatcher.process_batch(&self.registry, |message| {
            if notify {
                events.emit(ConnectionEvent::Message(Arc::new(message.clone())));
            }
        });
    }

    fn stats(&self) -> ConnectionStats {
        let dispatcher = self.dispatcher.stats();

        ConnectionStats {
            status: self.state,
            reconnect_attempts: self.backoff.attempts(),
            subscribers_count: self.registry.channel_count(),
            callback_count: self.registry.subscriber_count(),
            message_queue_length: self.dispatcher.len(),
            outbound_queue_length: self.outbound_queue.len(),
            ping_interval_ms: self.config.ping_interval_ms,
            last_ping_sent: self.heartbeat.last_ping_sent(),
            last_pong_received: self.heartbeat.last_pong_received(),
            frames_received: dispatcher.frames_received,
            frames_malformed: dispatcher.frames_malformed,
            callback_errors: dispatcher.callback_errors,
            channels: self.registry.channel_info(),
        }
    }
}

async fn poll_connect(
    pending: &mut Option<ConnectFuture>,
) -> std::result::Result<TransportLink, TransportError> {
    match pending {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

/// Next event from the live transport; a vanished transport reads as closed
async fn next_transport_event(inbound: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>) -> TransportEvent {
    match inbound {
        Some(rx) => rx.recv().await.unwrap_or(TransportEvent::Closed {
            reason: Some("transport task ended".to_string()),
        }),
        None => std::future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
