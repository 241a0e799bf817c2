use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ClientError;

/// Frames sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
    Ping { timestamp: i64 },
}

impl ClientFrame {
    pub fn subscribe(channel: impl Into<String>) -> Self {
        Self::Subscribe {
            channel: channel.into(),
        }
    }

    pub fn unsubscribe(channel: impl Into<String>) -> Self {
        Self::Unsubscribe {
            channel: channel.into(),
        }
    }

    pub fn ping(timestamp: i64) -> Self {
        Self::Ping { timestamp }
    }

    /// Value of the `type` field, used as a metric label
    pub fn frame_type(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Ping { .. } => "ping",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A decoded inbound frame: `{ type, channel?, payload?, timestamp? }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default)]
    pub payload: Value,
    /// Integer timestamps only; floats, strings and other shapes read as `None`
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<i64>,
}

/// Accepts any JSON value so a foreign timestamp never rejects the frame
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(Value::as_i64))
}

impl InboundMessage {
    /// Decode the payload into the type a subscriber expects
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    pub fn is_pong(&self) -> bool {
        self.message_type == "pong"
    }
}

/// Classification of a raw inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    /// Heartbeat reply; consumed by the connection manager
    Pong { timestamp: Option<i64> },
    /// Anything else with a `type`, routed to channel subscribers and listeners
    Message(InboundMessage),
}

impl ServerFrame {
    /// Parse one text frame.
    ///
    /// A frame must be a JSON object with a string `type` field.
    pub fn parse(raw: &str) -> Result<Self, ClientError> {
        let message: InboundMessage = serde_json::from_str(raw)
            .map_err(|e| ClientError::MalformedFrame(e.to_string()))?;

        if message.is_pong() {
            return Ok(Self::Pong {
                timestamp: message.timestamp,
            });
        }

        Ok(Self::Message(message))
    }
}
