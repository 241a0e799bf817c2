//! Application-facing facade over the connection manager.
//!
//! Stores register here to make the channels they depend on discoverable,
//! and subscribe through here so every delivery stamps the channel with the
//! time it was last refreshed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::config::RealtimeConfig;
use crate::connection_manager::{
    ConnectionManager, ConnectionState, ConnectionStats, SubscriptionHandle,
};
use crate::error::Result;
use crate::websocket::InboundMessage;

/// A store and the channels it consumes
#[derive(Debug, Clone, Serialize)]
pub struct StoreRegistration {
    pub name: String,
    pub channels: Vec<String>,
    pub registered_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct RealtimeDataManager {
    connection: ConnectionManager,
    stores: Arc<DashMap<String, StoreRegistration>>,
    /// channel -> time of the last successful delivery
    last_updates: Arc<DashMap<String, DateTime<Utc>>>,
}

impl RealtimeDataManager {
    pub fn new(config: RealtimeConfig) -> Result<Self> {
        Ok(Self::from_connection(ConnectionManager::new(config)?))
    }

    /// Wrap an existing connection manager
    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self {
            connection,
            stores: Arc::new(DashMap::new()),
            last_updates: Arc::new(DashMap::new()),
        }
    }

    /// Record that `name` depends on `channels`. Re-registering replaces the entry.
    pub fn register_store(&self, name: impl Into<String>, channels: &[&str]) {
        let name = name.into();
        let registration = StoreRegistration {
            name: name.clone(),
            channels: channels.iter().map(|c| c.to_string()).collect(),
            registered_at: Utc::now(),
        };

        tracing::debug!(store = %name, channels = ?registration.channels, "Store registered");
        self.stores.insert(name, registration);
    }

    pub fn unregister_store(&self, name: &str) -> Option<StoreRegistration> {
        self.stores.remove(name).map(|(_, registration)| registration)
    }

    /// Registered stores, sorted by name
    pub fn stores(&self) -> Vec<StoreRegistration> {
        let mut stores: Vec<StoreRegistration> =
            self.stores.iter().map(|entry| entry.value().clone()).collect();
        stores.sort_by(|a, b| a.name.cmp(&b.name));
        stores
    }

    /// Subscribe and record freshness after each delivery that completes
    pub fn subscribe<F>(&self, channel: impl Into<String>, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Value, &InboundMessage) + Send + Sync + 'static,
    {
        let channel = channel.into();
        let last_updates = self.last_updates.clone();
        let name = channel.clone();

        self.connection.subscribe(channel, move |payload, message| {
            callback(payload, message);
            last_updates.insert(name.clone(), Utc::now());
        })
    }

    /// Typed variant of [`subscribe`](Self::subscribe). Undecodable payloads
    /// are skipped and do not count as an update.
    pub fn subscribe_typed<T, F>(&self, channel: impl Into<String>, callback: F) -> SubscriptionHandle
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let channel = channel.into();
        let last_updates = self.last_updates.clone();
        let name = channel.clone();

        self.connection.subscribe_typed::<T, _>(channel, move |value| {
            callback(value);
            last_updates.insert(name.clone(), Utc::now());
        })
    }

    pub fn last_update(&self, channel: &str) -> Option<DateTime<Utc>> {
        self.last_updates.get(channel).map(|entry| *entry.value())
    }

    /// True if `channel` never received data or its last update is older than `max_age`
    pub fn is_stale(&self, channel: &str, max_age: Duration) -> bool {
        match self.last_update(channel) {
            Some(at) => is_older_than(at, max_age),
            None => true,
        }
    }

    /// Channels of registered stores that are stale, sorted and deduplicated
    pub fn stale_channels(&self, max_age: Duration) -> Vec<String> {
        let mut channels: Vec<String> = self
            .stores
            .iter()
            .flat_map(|entry| entry.value().channels.clone())
            .filter(|channel| self.is_stale(channel, max_age))
            .collect();
        channels.sort();
        channels.dedup();
        channels
    }

    pub async fn connect(&self) -> Result<()> {
        self.connection.connect().await
    }

    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    pub fn status(&self) -> ConnectionState {
        self.connection.status()
    }

    pub async fn stats(&self) -> Result<ConnectionStats> {
        self.connection.stats().await
    }

    /// The underlying connection manager
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }
}

fn is_older_than(at: DateTime<Utc>, max_age: Duration) -> bool {
    match chrono::Duration::from_std(max_age) {
        Ok(max_age) => Utc::now() - at > max_age,
        // Larger than chrono can represent: nothing is that old
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> RealtimeDataManager {
        RealtimeDataManager::new(RealtimeConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_store_registry() {
        let realtime = manager();
        realtime.register_store("portfolio", &["positions", "market_data"]);
        realtime.register_store("agents", &["agents"]);

        let stores = realtime.stores();
        assert_eq!(stores.len(), 2);
        assert_eq!(stores[0].name, "agents");
        assert_eq!(stores[1].channels, vec!["positions", "market_data"]);

        let removed = realtime.unregister_store("agents").unwrap();
        assert_eq!(removed.channels, vec!["agents"]);
        assert!(realtime.unregister_store("agents").is_none());
        assert_eq!(realtime.stores().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_channel_is_stale() {
        let realtime = manager();
        assert!(realtime.last_update("agents").is_none());
        assert!(realtime.is_stale("agents", Duration::from_secs(3600)));
    }

    #[tokio::test]
    async fn test_staleness_by_age() {
        let realtime = manager();
        realtime.register_store("portfolio", &["positions", "market_data"]);
        realtime.register_store("risk", &["positions"]);

        realtime
            .last_updates
            .insert("positions".to_string(), Utc::now());
        realtime.last_updates.insert(
            "market_data".to_string(),
            Utc::now() - chrono::Duration::minutes(10),
        );

        assert!(!realtime.is_stale("positions", Duration::from_secs(60)));
        assert!(realtime.is_stale("market_data", Duration::from_secs(60)));
        assert_eq!(
            realtime.stale_channels(Duration::from_secs(60)),
            vec!["market_data".to_string()]
        );
        assert!(realtime.stale_channels(Duration::from_secs(3600)).is_empty());
    }
}
