use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use smallvec::SmallVec;
use uuid::Uuid;

use super::stats::ChannelInfo;
use crate::websocket::InboundMessage;

/// Callback invoked with `(payload, message)` for every message on a channel
pub type ChannelCallback = Arc<dyn Fn(&Value, &InboundMessage) + Send + Sync>;

/// Identifies one registered callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

struct Subscriber {
    id: SubscriberId,
    callback: ChannelCallback,
}

/// Desired channels and the callbacks each one notifies.
///
/// A channel is present iff it has at least one callback. Owned by the
/// connection actor, so no interior locking.
#[derive(Default)]
pub struct ChannelRegistry {
    /// channel_name -> callbacks
    channels: HashMap<String, SmallVec<[Subscriber; 4]>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback. Returns true if this is the channel's first subscriber.
    pub fn insert(&mut self, channel: &str, id: SubscriberId, callback: ChannelCallback) -> bool {
        let subscribers = self.channels.entry(channel.to_string()).or_default();
        let first = subscribers.is_empty();

        if subscribers.iter().any(|s| s.id == id) {
            return false;
        }
        subscribers.push(Subscriber { id, callback });

        tracing::debug!(channel = %channel, subscriber_id = %id, first = first, "Subscriber registered");
        first
    }

    /// Remove a callback. Returns true if the channel entry was deleted.
    pub fn remove(&mut self, channel: &str, id: SubscriberId) -> bool {
        let Some(subscribers) = self.channels.get_mut(channel) else {
            return false;
        };

        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        if subscribers.len() == before {
            return false;
        }

        tracing::debug!(channel = %channel, subscriber_id = %id, "Subscriber removed");

        if subscribers.is_empty() {
            self.channels.remove(channel);
            return true;
        }
        false
    }

    /// Snapshot of the callbacks for a channel, so delivery can run without
    /// holding a borrow on the registry
    pub fn callbacks(&self, channel: &str) -> SmallVec<[ChannelCallback; 4]> {
        self.channels
            .get(channel)
            .map(|subs| subs.iter().map(|s| s.callback.clone()).collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.channels.values().map(|subs| subs.len()).sum()
    }

    pub fn channel_info(&self) -> Vec<ChannelInfo> {
        let mut info: Vec<ChannelInfo> = self
            .channels
            .iter()
            .map(|(name, subs)| ChannelInfo {
                name: name.clone(),
                subscriber_count: subs.len(),
            })
            .collect();
        info.sort_by(|a, b| a.name.cmp(&b.name));
        info
    }

    pub fn clear(&mut self) {
        self.channels.clear();
    }
}
