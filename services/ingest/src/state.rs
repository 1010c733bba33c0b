//! Owned service state, constructed once at startup and passed explicitly
//! to handlers.  No global singletons.

use crate::adapters::broadcast::ChannelBroadcaster;
use crate::adapters::inference::{HttpSummariser, LocalSummariser};
use crate::adapters::memory::InMemoryIndex;
use crate::adapters::{Broadcaster, IndexWriter, Searcher, Summariser};
use crate::config::IngestConfig;
use crate::dispatch;
use crate::mapping::MeetingDirectory;
use crate::registry::ConnectionRegistry;
use crate::session::events::StreamEvent;
use crate::transcript::{BufferSignal, TranscriptBufferHandle, spawn_buffer};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tracing::info;

pub struct AppState {
    pub config: IngestConfig,
    pub registry: ConnectionRegistry,
    pub directory: MeetingDirectory,
    pub index: Arc<dyn IndexWriter>,
    pub searcher: Arc<dyn Searcher>,
    pub summariser: Arc<dyn Summariser>,
    pub broadcaster: Arc<dyn Broadcaster>,
    events_tx: mpsc::Sender<StreamEvent>,
    signals_tx: mpsc::Sender<BufferSignal>,
    buffers: RwLock<HashMap<String, TranscriptBufferHandle>>,
}

impl AppState {
    /// Wire the adapters and spawn the two dispatcher pumps.
    ///
    /// The in-memory index doubles as the lexical searcher; the summariser
    /// talks HTTP when an inference backend is configured and degrades to
    /// the local merge otherwise.
    pub fn build(config: IngestConfig) -> Arc<AppState> {
        let index = Arc::new(InMemoryIndex::new());
        let searcher: Arc<dyn Searcher> = index.clone();
        let summariser: Arc<dyn Summariser> = match &config.inference {
            Some(inference) => {
                info!(base_url = %inference.base_url, "using inference-backed summariser");
                Arc::new(HttpSummariser::new(&inference.base_url))
            }
            None => {
                info!("no inference backend configured; summaries degrade to local merging");
                Arc::new(LocalSummariser)
            }
        };
        let broadcaster: Arc<dyn Broadcaster> = Arc::new(ChannelBroadcaster::new());

        let (events_tx, events_rx) = mpsc::channel(1024);
        let (signals_tx, signals_rx) = mpsc::channel(256);

        let index_writer: Arc<dyn IndexWriter> = index;
        let state = Arc::new(AppState {
            directory: MeetingDirectory::new(index_writer.clone()),
            registry: ConnectionRegistry::default(),
            index: index_writer,
            searcher,
            summariser,
            broadcaster,
            events_tx,
            signals_tx,
            buffers: RwLock::new(HashMap::new()),
            config,
        });

        tokio::spawn(dispatch::run_event_pump(state.clone(), events_rx));
        tokio::spawn(dispatch::run_signal_pump(state.clone(), signals_rx));
        state
    }

    /// Sender handed to every spawned session.
    pub fn events_tx(&self) -> mpsc::Sender<StreamEvent> {
        self.events_tx.clone()
    }

    /// The meeting's transcript buffer, created on first use.
    pub async fn ensure_buffer(&self, meeting_uuid: &str) -> TranscriptBufferHandle {
        {
            let buffers = self.buffers.read().await;
            if let Some(handle) = buffers.get(meeting_uuid) {
                return handle.clone();
            }
        }
        let mut buffers = self.buffers.write().await;
        if let Some(handle) = buffers.get(meeting_uuid) {
            return handle.clone();
        }
        info!(meeting_uuid, "creating transcript buffer");
        let handle = spawn_buffer(meeting_uuid, self.signals_tx.clone());
        buffers.insert(meeting_uuid.to_owned(), handle.clone());
        handle
    }

    /// Flush and tear down the meeting's transcript buffer (meeting over).
    pub async fn destroy_buffer(&self, meeting_uuid: &str) {
        let handle = self.buffers.write().await.remove(meeting_uuid);
        if let Some(handle) = handle {
            info!(meeting_uuid, "destroying transcript buffer");
            handle.destroy().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    fn test_config() -> IngestConfig {
        load_config_from_str(
            r#"
            schema_version = 1

            [credentials]
            client_id = "cid"
            client_secret = "cs"
            secret_token = "st"
        "#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn buffers_are_created_once_and_destroyed_on_demand() {
        let state = AppState::build(test_config());
        let a = state.ensure_buffer("UUID-A").await;
        let b = state.ensure_buffer("UUID-A").await;
        // same underlying task: both handles feed one buffer
        drop((a, b));
        assert_eq!(state.buffers.read().await.len(), 1);

        state.destroy_buffer("UUID-A").await;
        assert!(state.buffers.read().await.is_empty());
        // destroying twice is a no-op
        state.destroy_buffer("UUID-A").await;
    }
}
