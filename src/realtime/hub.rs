//! Gateway-side channel fan-out, isolated per tenant.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, RwLock};

use super::protocol::ServerFrame;

/// Fully qualified channel; the same name in two tenants is two channels.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub tenant: String,
    pub namespace: Option<String>,
    pub channel: String,
}

impl ChannelKey {
    pub fn new(tenant: impl Into<String>, namespace: Option<String>, channel: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            namespace,
            channel: channel.into(),
        }
    }
}

#[derive(Clone)]
pub struct RealtimeHub {
    channels: Arc<RwLock<HashMap<ChannelKey, broadcast::Sender<Arc<ServerFrame>>>>>,
    capacity: usize,
}

impl RealtimeHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    pub async fn subscribe(&self, key: ChannelKey) -> broadcast::Receiver<Arc<ServerFrame>> {
        let mut channels = self.channels.write().await;
        channels
            .entry(key)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Drop the channel once nobody listens any more.
    pub async fn release(&self, key: &ChannelKey) {
        let mut channels = self.channels.write().await;
        if channels.get(key).is_some_and(|tx| tx.receiver_count() == 0) {
            channels.remove(key);
            tracing::trace!("Released channel {:?}", key);
        }
    }

    /// Deliver `payload` to current listeners; returns how many received it.
    /// Nothing is retained for later joiners.
    pub async fn publish(&self, key: &ChannelKey, payload: Value) -> usize {
        let channels = self.channels.read().await;
        let Some(tx) = channels.get(key) else {
            return 0;
        };
        let frame = Arc::new(ServerFrame::data(key.channel.clone(), payload));
        tx.send(frame).unwrap_or(0)
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_reaches_only_the_same_tenant() {
        let hub = RealtimeHub::new(8);
        let mine = ChannelKey::new("org-1", None, "vitals");
        let theirs = ChannelKey::new("org-2", None, "vitals");

        let mut rx_mine = hub.subscribe(mine.clone()).await;
        let mut rx_theirs = hub.subscribe(theirs.clone()).await;

        assert_eq!(hub.publish(&mine, json!({"bpm": 80})).await, 1);
        let frame = rx_mine.recv().await.unwrap();
        assert_eq!(*frame, ServerFrame::data("vitals", json!({"bpm": 80})));
        assert!(rx_theirs.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_without_listeners_is_dropped() {
        let hub = RealtimeHub::new(8);
        let key = ChannelKey::new("org-1", Some("care".into()), "alerts");
        assert_eq!(hub.publish(&key, json!(1)).await, 0);
    }

    #[tokio::test]
    async fn release_removes_idle_channels() {
        let hub = RealtimeHub::new(8);
        let key = ChannelKey::new("org-1", None, "alerts");

        let rx = hub.subscribe(key.clone()).await;
        hub.release(&key).await;
        assert_eq!(hub.channel_count().await, 1);

        drop(rx);
        hub.release(&key).await;
        assert_eq!(hub.channel_count().await, 0);
    }
}
