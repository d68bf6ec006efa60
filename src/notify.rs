use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::sync::{Delta, Scope};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for deltas per sync scope.
pub struct NotifyHub {
    channels: DashMap<Scope, broadcast::Sender<Delta>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to deltas for a scope. Creates the channel if needed.
    pub fn subscribe(&self, scope: Scope) -> broadcast::Receiver<Delta> {
        let sender = self
            .channels
            .entry(scope)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a delta. No-op if nobody is listening.
    pub fn send(&self, scope: Scope, delta: &Delta) {
        if let Some(sender) = self.channels.get(&scope) {
            let _ = sender.send(delta.clone());
        }
    }

    pub fn subscriber_count(&self, scope: Scope) -> usize {
        self.channels.get(&scope).map_or(0, |s| s.receiver_count())
    }

    /// Remove a channel (e.g. when a room is deleted).
    pub fn remove(&self, scope: Scope) {
        self.channels.remove(&scope);
    }
}
