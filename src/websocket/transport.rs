//! Transport seam for the connection manager.
//!
//! A [`Connector`] opens one duplex link and hands back a pair of channels.
//! The connection manager never touches the socket directly: it pushes text
//! frames into [`TransportLink::outbound`] and reads [`TransportEvent`]s from
//! [`TransportLink::inbound`]. Dropping the link tears the socket down.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::TransportError;

/// Events reported by a live transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One text frame
    Frame(String),
    /// The peer closed the connection
    Closed { reason: Option<String> },
    /// The transport failed; no further events follow
    Error(String),
}

/// An open transport connection
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

impl TransportLink {
    /// Split into the write and read halves
    pub fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedSender<String>,
        mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        (self.outbound, self.inbound)
    }
}

/// Opens transport links to a URL
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<TransportLink, TransportError>;
}

/// WebSocket connector built on tokio-tungstenite
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<TransportLink, TransportError> {
        tracing::debug!(url = %url, "Opening WebSocket");

        let (ws_stream, _response) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout))?
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<TransportEvent>();

        // Writer: runs until the link's sender is dropped, then closes the socket
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                    tracing::debug!(error = %e, "WebSocket send failed");
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        // Reader: runs until the socket ends or the link's receiver is dropped.
        // A dead peer never yields from `next()`, so the receiver drop is
        // watched directly and releases the socket.
        tokio::spawn(async move {
            loop {
                let result = tokio::select! {
                    _ = in_tx.closed() => {
                        tracing::debug!("Transport link dropped; releasing socket");
                        return;
                    }
                    next = ws_receiver.next() => match next {
                        Some(result) => result,
                        None => break,
                    },
                };

                let event = match result {
                    Ok(Message::Text(text)) => TransportEvent::Frame(text.as_str().to_owned()),
                    Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => TransportEvent::Frame(text),
                        Err(_) => {
                            tracing::debug!(len = data.len(), "Dropping non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        let reason = frame
                            .map(|f| f.reason.as_str().to_owned())
                            .filter(|r| !r.is_empty());
                        let _ = in_tx.send(TransportEvent::Closed { reason });
                        return;
                    }
                    // Protocol-level ping/pong is answered by tungstenite
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = in_tx.send(TransportEvent::Error(e.to_string()));
                        return;
                    }
                };

                if in_tx.send(event).is_err() {
                    return;
                }
            }
            let _ = in_tx.send(TransportEvent::Closed { reason: None });
        });

        Ok(TransportLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
