//! Process-wide index of live stream sessions plus a bounded history of
//! terminated ones.
//!
//! Metadata accessors consult the active map first and fall back to the
//! history ring, so stream metadata stays queryable throughout — and for a
//! bounded time after — a meeting's lifetime.

use crate::session::{SessionHandle, StreamMetadata};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

pub struct ConnectionRegistry {
    active: RwLock<HashMap<String, Arc<SessionHandle>>>,
    history: Mutex<VecDeque<StreamMetadata>>,
    history_capacity: usize,
}

impl ConnectionRegistry {
    pub fn new(history_capacity: usize) -> Self {
        ConnectionRegistry {
            active: RwLock::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            history_capacity,
        }
    }

    /// Register a session.  Returns `false` (and drops nothing) when a
    /// session for the stream id is already present — at most one active
    /// session per stream id, always.
    pub async fn add(&self, handle: Arc<SessionHandle>) -> bool {
        let mut active = self.active.write().await;
        if active.contains_key(handle.stream_id()) {
            return false;
        }
        active.insert(handle.stream_id().to_owned(), handle);
        true
    }

    pub async fn get(&self, stream_id: &str) -> Option<Arc<SessionHandle>> {
        self.active.read().await.get(stream_id).cloned()
    }

    pub async fn has(&self, stream_id: &str) -> bool {
        self.active.read().await.contains_key(stream_id)
    }

    pub async fn find_by_meeting_uuid(&self, meeting_uuid: &str) -> Option<Arc<SessionHandle>> {
        self.active
            .read()
            .await
            .values()
            .find(|h| h.meeting_uuid() == meeting_uuid)
            .cloned()
    }

    /// Remove a session, snapshotting its terminal stats into the history
    /// ring.
    pub async fn remove(&self, stream_id: &str) -> Option<Arc<SessionHandle>> {
        let handle = self.active.write().await.remove(stream_id)?;
        self.archive(handle.snapshot().await).await;
        Some(handle)
    }

    pub async fn clear(&self) {
        let drained: Vec<Arc<SessionHandle>> =
            self.active.write().await.drain().map(|(_, h)| h).collect();
        for handle in drained {
            self.archive(handle.snapshot().await).await;
        }
    }

    pub async fn size(&self) -> usize {
        self.active.read().await.len()
    }

    /// Metadata for an active stream, or the most recent archived record.
    pub async fn metadata(&self, stream_id: &str) -> Option<StreamMetadata> {
        if let Some(handle) = self.get(stream_id).await {
            return Some(handle.snapshot().await);
        }
        self.history
            .lock()
            .await
            .iter()
            .rev()
            .find(|m| m.stream_id == stream_id)
            .cloned()
    }

    /// First/last media packet timestamps; valid during the session and for
    /// as long as the record survives in the history ring.
    pub async fn timestamps(&self, stream_id: &str) -> Option<(Option<u64>, Option<u64>)> {
        self.metadata(stream_id)
            .await
            .map(|m| (m.first_packet_ts, m.last_packet_ts))
    }

    async fn archive(&self, mut snapshot: StreamMetadata) {
        if snapshot.ended_at.is_none() {
            snapshot.ended_at = Some(chrono::Utc::now());
        }
        debug!(stream_id = %snapshot.stream_id, "archiving stream record");
        let mut history = self.history.lock().await;
        history.push_back(snapshot);
        while history.len() > self.history_capacity {
            history.pop_front();
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        ConnectionRegistry::new(DEFAULT_HISTORY_CAPACITY)
    }
}
