//! Live per-meeting broadcast channels.
//!
//! One `tokio::sync::broadcast` channel per meeting, created lazily on the
//! first publish or subscribe.  Sends are fire-and-forget: a send with no
//! subscribers simply drops the payload, and a slow subscriber that lags
//! past the channel capacity loses the oldest messages (at-least-once best
//! effort; clients de-duplicate).

use super::Broadcaster;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{RwLock, broadcast};

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Default)]
pub struct ChannelBroadcaster {
    channels: RwLock<HashMap<String, broadcast::Sender<serde_json::Value>>>,
}

impl ChannelBroadcaster {
    pub fn new() -> Self {
        ChannelBroadcaster::default()
    }

    async fn get_or_create(&self, meeting_uuid: &str) -> broadcast::Sender<serde_json::Value> {
        {
            let channels = self.channels.read().await;
            if let Some(tx) = channels.get(meeting_uuid) {
                return tx.clone();
            }
        }
        let mut channels = self.channels.write().await;
        if let Some(tx) = channels.get(meeting_uuid) {
            return tx.clone();
        }
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        channels.insert(meeting_uuid.to_owned(), tx.clone());
        tx
    }

    /// Drop a meeting's channel once the meeting is gone.
    pub async fn remove(&self, meeting_uuid: &str) {
        self.channels.write().await.remove(meeting_uuid);
    }
}

#[async_trait]
impl Broadcaster for ChannelBroadcaster {
    async fn publish(&self, meeting_uuid: &str, payload: serde_json::Value) {
        let tx = self.get_or_create(meeting_uuid).await;
        // Err just means nobody is listening right now.
        let _ = tx.send(payload);
    }

    async fn subscribe(
        &self,
        meeting_uuid: &str,
    ) -> broadcast::Receiver<serde_json::Value> {
        self.get_or_create(meeting_uuid).await.subscribe()
    }

    async fn retire(&self, meeting_uuid: &str) {
        self.remove(meeting_uuid).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_payloads() {
        let broadcaster = ChannelBroadcaster::new();
        let mut rx = broadcaster.subscribe("UUID-A").await;
        broadcaster
            .publish("UUID-A", serde_json::json!({"type": "chunk", "seq": 1}))
            .await;
        let payload = rx.recv().await.unwrap();
        assert_eq!(payload["seq"], 1);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fire_and_forget() {
        let broadcaster = ChannelBroadcaster::new();
        broadcaster
            .publish("UUID-B", serde_json::json!({"type": "chunk"}))
            .await;
        // a later subscriber sees only what comes after subscribing
        let mut rx = broadcaster.subscribe("UUID-B").await;
        broadcaster
            .publish("UUID-B", serde_json::json!({"type": "summary"}))
            .await;
        assert_eq!(rx.recv().await.unwrap()["type"], "summary");
    }

    #[tokio::test]
    async fn meetings_are_isolated() {
        let broadcaster = ChannelBroadcaster::new();
        let mut rx_a = broadcaster.subscribe("UUID-A").await;
        broadcaster
            .publish("UUID-B", serde_json::json!({"type": "chunk"}))
            .await;
        assert!(rx_a.try_recv().is_err());
    }
}
