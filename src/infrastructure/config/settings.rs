use std::env;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::error::ClientError;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection settings for the realtime client
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// WebSocket endpoint, e.g. `ws://localhost:8081/ws`
    #[serde(default = "default_url")]
    pub url: String,
    /// Reconnect attempts before giving up
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Base of the exponential backoff in milliseconds
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    /// Jitter factor applied to each backoff delay (0.0 disables jitter)
    #[serde(default)]
    pub reconnect_jitter: f64,
    /// Interval between heartbeat pings in milliseconds
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// How long to wait for a pong before declaring the connection dead
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
    /// Transport handshake timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Maximum inbound messages dispatched per processing pass
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum application frames held while disconnected
    #[serde(default = "default_max_outbound_queue")]
    pub max_outbound_queue: usize,
    /// Channels the CLI subscribes to on startup
    #[serde(default)]
    pub channels: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_url() -> String {
    "ws://localhost:8081/ws".to_string()
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_interval_ms() -> u64 {
    1000
}

fn default_ping_interval_ms() -> u64 {
    30_000 // 30 seconds
}

fn default_ping_timeout_ms() -> u64 {
    5_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_batch_size() -> usize {
    50
}

fn default_max_outbound_queue() -> usize {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("realtime.url", default_url())?
            .set_default("realtime.max_reconnect_attempts", 5)?
            .set_default("realtime.reconnect_interval_ms", 1000)?
            .set_default("realtime.ping_interval_ms", 30_000)?
            .set_default("realtime.ping_timeout_ms", 5_000)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // ARA_REALTIME__URL, ARA_REALTIME__PING_INTERVAL_MS, ARA_LOGGING__LEVEL, ...
            .add_source(
                Environment::with_prefix("ARA")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("realtime.channels"),
            );

        builder.build()?.try_deserialize()
    }
}

impl RealtimeConfig {
    /// Config with defaults for everything but the endpoint
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Reject settings the connection manager cannot run with
    pub fn validate(&self) -> Result<(), ClientError> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(ClientError::InvalidConfig("url must not be empty".into()));
        }
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ClientError::InvalidConfig(format!(
                "url must use ws:// or wss://, got {}",
                url
            )));
        }
        if self.reconnect_interval_ms == 0 {
            return Err(ClientError::InvalidConfig(
                "reconnect_interval_ms must be greater than zero".into(),
            ));
        }
        if self.ping_interval_ms == 0 || self.ping_timeout_ms == 0 {
            return Err(ClientError::InvalidConfig(
                "ping_interval_ms and ping_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ClientError::InvalidConfig(
                "batch_size must be greater than zero".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.reconnect_jitter) {
            return Err(ClientError::InvalidConfig(format!(
                "reconnect_jitter must be in [0, 1), got {}",
                self.reconnect_jitter
            )));
        }
        Ok(())
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            reconnect_jitter: 0.0,
            ping_interval_ms: default_ping_interval_ms(),
            ping_timeout_ms: default_ping_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            batch_size: default_batch_size(),
            max_outbound_queue: default_max_outbound_queue(),
            channels: vec![],
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = RealtimeConfig::default();
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.reconnect_interval(), Duration::from_millis(1000));
        assert_eq!(config.ping_interval(), Duration::from_secs(30));
        assert_eq!(config.ping_timeout(), Duration::from_secs(5));
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.reconnect_jitter, 0.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_scheme() {
        let config = RealtimeConfig::new("http://localhost/ws");
        assert!(matches!(config.validate(), Err(ClientError::InvalidConfig(_))));

        let config = RealtimeConfig::new("  ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        let config = RealtimeConfig {
            ping_timeout_ms: 0,
            ..RealtimeConfig::new("ws://localhost/ws")
        };
        assert!(config.validate().is_err());

        let config = RealtimeConfig {
            batch_size: 0,
            ..RealtimeConfig::new("wss://localhost/ws")
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_jitter_out_of_range() {
        let config = RealtimeConfig {
            reconnect_jitter: 1.0,
            ..RealtimeConfig::new("ws://localhost/ws")
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_section() {
        let json = r#"{"realtime": {"url": "ws://example.com/ws", "ping_interval_ms": 1000}}"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.realtime.url, "ws://example.com/ws");
        assert_eq!(settings.realtime.ping_interval_ms, 1000);
        assert_eq!(settings.realtime.ping_timeout_ms, 5000);
        assert_eq!(settings.logging.level, "info");
    }
}
