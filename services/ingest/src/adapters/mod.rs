//! Narrow contracts the core depends on.
//!
//! The index, the semantic searcher, the summariser, and the live
//! broadcaster are external collaborators; the core only ever talks to
//! these traits.  Failures are soft: callers log at warn and move on —
//! ingestion never stalls on a slow or broken downstream.

pub mod broadcast;
pub mod inference;
pub mod memory;

use crate::transcript::{ContentChunk, SummarizeRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("index: {0}")]
    Index(String),
    #[error("inference backend: {0}")]
    Inference(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// The evolving per-speaker summary + topic set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerContext {
    pub meeting_id: String,
    pub speaker_id: String,
    pub speaker_name: String,
    pub summary: String,
    pub topics: Vec<String>,
    pub last_updated: DateTime<Utc>,
    pub segment_count: u64,
}

impl SpeakerContext {
    pub fn doc_id(&self) -> String {
        format!("{}-{}", self.meeting_id, self.speaker_id)
    }
}

/// A speaker known to a meeting's index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerRef {
    pub speaker_id: String,
    pub speaker_name: String,
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk: ContentChunk,
    pub score: f32,
}

/// What the summariser produced for one trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerSummary {
    pub summary: String,
    pub topics: Vec<String>,
}

/// Writer (and the read paths the HTTP surface needs) for the durable
/// index collections.
#[async_trait]
pub trait IndexWriter: Send + Sync {
    async fn insert_chunk(&self, chunk: &ContentChunk) -> Result<(), AdapterError>;

    async fn upsert_speaker_context(&self, ctx: &SpeakerContext) -> Result<(), AdapterError>;

    async fn persist_meeting_mapping(&self, numeric_id: i64, uuid: &str)
    -> Result<(), AdapterError>;

    async fn resolve_meeting_uuid(&self, numeric_id: i64) -> Result<Option<String>, AdapterError>;

    async fn mark_meeting_ended(&self, uuid: &str) -> Result<(), AdapterError>;

    /// Chunks sorted by `start_time`, capped at `limit`.
    async fn chunks_for_meeting(
        &self,
        meeting_uuid: &str,
        limit: usize,
    ) -> Result<Vec<ContentChunk>, AdapterError>;

    async fn speaker_context(
        &self,
        meeting_uuid: &str,
        speaker_id: &str,
    ) -> Result<Option<SpeakerContext>, AdapterError>;

    async fn speakers_for_meeting(
        &self,
        meeting_uuid: &str,
    ) -> Result<Vec<SpeakerRef>, AdapterError>;
}

/// Ranked retrieval over indexed chunks.  Implementations may fall back to
/// lexical search when the embedding path is unavailable; callers treat
/// that as a soft failure, not an error.
#[async_trait]
pub trait Searcher: Send + Sync {
    async fn semantic_search(
        &self,
        query: &str,
        meeting_uuid: Option<&str>,
        speaker_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchHit>, AdapterError>;
}

/// Summary generation and free-form completion against the inference
/// backend.
#[async_trait]
pub trait Summariser: Send + Sync {
    /// Merge the prior summary with the new text into a fresh summary and
    /// topic set.
    async fn summarise(
        &self,
        request: &SummarizeRequest,
        prior: Option<&SpeakerContext>,
    ) -> Result<SpeakerSummary, AdapterError>;

    /// Free-form completion, used by the chat endpoint.
    async fn complete(&self, prompt: &str) -> Result<String, AdapterError>;
}

/// Per-meeting push channel for live client updates.  Fire-and-forget,
/// at-least-once best effort; de-duplication is the client's concern.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn publish(&self, meeting_uuid: &str, payload: serde_json::Value);

    async fn subscribe(
        &self,
        meeting_uuid: &str,
    ) -> tokio::sync::broadcast::Receiver<serde_json::Value>;

    /// Tear down a meeting's channel once the meeting is gone.
    async fn retire(&self, _meeting_uuid: &str) {}
}
