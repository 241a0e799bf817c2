use std::time::Duration;

use thiserror::Error;

/// Failures reported by the underlying transport.
///
/// All of these are recovered by the reconnect state machine; callers only
/// see them through `connect()` results and `Error` events.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("transport error: {0}")]
    Io(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("no pong received within {0:?}")]
    HeartbeatTimeout(Duration),

    #[error("reconnect attempts exhausted after {attempts} tries")]
    ConnectionExhausted { attempts: u32 },

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("failed to encode frame: {0}")]
    Encode(String),

    #[error("subscriber on channel {channel} failed: {message}")]
    Callback { channel: String, message: String },

    #[error("connection was closed by disconnect()")]
    Disconnected,

    #[error("connection manager task is not running")]
    ManagerClosed,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientError {
    /// Whether the reconnect state machine will keep trying after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::HeartbeatTimeout(_))
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
