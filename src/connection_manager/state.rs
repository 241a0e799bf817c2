use serde::Serialize;

/// Lifecycle state of the managed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ConnectionState {
    /// Initial state, and terminal after `disconnect()` or exhausted retries
    Disconnected = 0,
    /// Waiting for the transport to open
    Connecting = 1,
    /// Transport open, heartbeat running
    Connected = 2,
    /// Waiting out a backoff delay before the next attempt
    Reconnecting = 3,
    /// `disconnect()` issued, waiting for the transport to confirm the close
    Closing = 4,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closing => "closing",
        }
    }

    pub fn is_connected(&self) -> bool {
        *self == ConnectionState::Connected
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_strings() {
        assert_eq!(ConnectionState::Disconnected.as_str(), "disconnected");
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(
            serde_json::to_string(&ConnectionState::Closing).unwrap(),
            r#""closing""#
        );
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
    }
}
