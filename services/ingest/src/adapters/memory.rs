//! In-memory index + lexical searcher.
//!
//! Backs the default deployment and the test suite.  The four logical
//! collections (`meetings`, `transcript_chunks`, `speaker_context` and the
//! speaker roster derived from chunks) live in one `RwLock`ed state; the
//! searcher scores chunks by query-term frequency, which is the lexical
//! fallback the semantic path degrades to.

use super::{
    AdapterError, IndexWriter, SearchHit, Searcher, SpeakerContext, SpeakerRef,
};
use crate::transcript::ContentChunk;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct MeetingRecord {
    uuid: String,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct IndexState {
    /// numeric id → meeting record
    meetings: HashMap<i64, MeetingRecord>,
    /// meeting uuid → chunks in insertion order
    chunks: HashMap<String, Vec<ContentChunk>>,
    /// `<meetingId>-<speakerId>` → context doc
    contexts: HashMap<String, SpeakerContext>,
}

#[derive(Default)]
pub struct InMemoryIndex {
    state: RwLock<IndexState>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        InMemoryIndex::default()
    }
}

#[async_trait]
impl IndexWriter for InMemoryIndex {
    async fn insert_chunk(&self, chunk: &ContentChunk) -> Result<(), AdapterError> {
        self.state
            .write()
            .await
            .chunks
            .entry(chunk.meeting_id.clone())
            .or_default()
            .push(chunk.clone());
        Ok(())
    }

    async fn upsert_speaker_context(&self, ctx: &SpeakerContext) -> Result<(), AdapterError> {
        self.state
            .write()
            .await
            .contexts
            .insert(ctx.doc_id(), ctx.clone());
        Ok(())
    }

    async fn persist_meeting_mapping(
        &self,
        numeric_id: i64,
        uuid: &str,
    ) -> Result<(), AdapterError> {
        let mut state = self.state.write().await;
        state
            .meetings
            .entry(numeric_id)
            .and_modify(|r| r.uuid = uuid.to_owned())
            .or_insert_with(|| MeetingRecord {
                uuid: uuid.to_owned(),
                started_at: Utc::now(),
                ended_at: None,
            });
        Ok(())
    }

    async fn resolve_meeting_uuid(&self, numeric_id: i64) -> Result<Option<String>, AdapterError> {
        Ok(self
            .state
            .read()
            .await
            .meetings
            .get(&numeric_id)
            .map(|r| r.uuid.clone()))
    }

    async fn mark_meeting_ended(&self, uuid: &str) -> Result<(), AdapterError> {
        let mut state = self.state.write().await;
        for record in state.meetings.values_mut() {
            if record.uuid == uuid {
                record.ended_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn chunks_for_meeting(
        &self,
        meeting_uuid: &str,
        limit: usize,
    ) -> Result<Vec<ContentChunk>, AdapterError> {
        let state = self.state.read().await;
        let mut chunks = state
            .chunks
            .get(meeting_uuid)
            .cloned()
            .unwrap_or_default();
        chunks.sort_by_key(|c| c.start_time);
        chunks.truncate(limit);
        Ok(chunks)
    }

    async fn speaker_context(
        &self,
        meeting_uuid: &str,
        speaker_id: &str,
    ) -> Result<Option<SpeakerContext>, AdapterError> {
        Ok(self
            .state
            .read()
            .await
            .contexts
            .get(&format!("{meeting_uuid}-{speaker_id}"))
            .cloned())
    }

    async fn speakers_for_meeting(
        &self,
        meeting_uuid: &str,
    ) -> Result<Vec<SpeakerRef>, AdapterError> {
        let state = self.state.read().await;
        let mut speakers: Vec<SpeakerRef> = Vec::new();
        for chunk in state.chunks.get(meeting_uuid).into_iter().flatten() {
            for (id, name) in chunk.speaker_ids.iter().zip(&chunk.speaker_names) {
                if !speakers.iter().any(|s| &s.speaker_id == id) {
                    speakers.push(SpeakerRef {
                        speaker_id: id.clone(),
                        speaker_name: name.clone(),
                    });
                }
            }
        }
        Ok(speakers)
    }
}

#[async_trait]
impl Searcher for InMemoryIndex {
    #[allow(clippy::cast_precision_loss)]
    async fn semantic_search(
        &self,
        query: &str,
        meeting_uuid: Option<&str>,
        speaker_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchHit>, AdapterError> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(str::to_lowercase)
            .filter(|t| !t.is_empty())
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let state = self.state.read().await;
        let mut hits: Vec<SearchHit> = state
            .chunks
            .iter()
            .filter(|(uuid, _)| meeting_uuid.is_none_or(|m| m == uuid.as_str()))
            .flat_map(|(_, chunks)| chunks.iter())
            .filter(|chunk| {
                speaker_id.is_none_or(|s| chunk.speaker_ids.iter().any(|id| id == s))
            })
            .filter_map(|chunk| {
                let haystack = chunk.text.to_lowercase();
                let score: usize = terms.iter().map(|t| haystack.matches(t).count()).sum();
                (score > 0).then(|| SearchHit {
                    chunk: chunk.clone(),
                    score: score as f32,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(meeting: &str, seq: u64, speaker: &str, text: &str, start: u64) -> ContentChunk {
        ContentChunk {
            chunk_id: format!("{meeting}-chunk-{seq}"),
            meeting_id: meeting.to_owned(),
            speaker_ids: vec![speaker.to_owned()],
            speaker_names: vec![speaker.to_owned()],
            text: text.to_owned(),
            start_time: start,
            end_time: start + 1_000,
        }
    }

    #[tokio::test]
    async fn mapping_round_trips() {
        let index = InMemoryIndex::new();
        index.persist_meeting_mapping(111, "UUID-A").await.unwrap();
        assert_eq!(
            index.resolve_meeting_uuid(111).await.unwrap().as_deref(),
            Some("UUID-A")
        );
        assert_eq!(index.resolve_meeting_uuid(222).await.unwrap(), None);

        // re-persisting updates in place
        index.persist_meeting_mapping(111, "UUID-B").await.unwrap();
        assert_eq!(
            index.resolve_meeting_uuid(111).await.unwrap().as_deref(),
            Some("UUID-B")
        );
    }

    #[tokio::test]
    async fn chunks_come_back_sorted_and_capped() {
        let index = InMemoryIndex::new();
        index
            .insert_chunk(&chunk("UUID-A", 2, "U1", "later", 5_000))
            .await
            .unwrap();
        index
            .insert_chunk(&chunk("UUID-A", 1, "U1", "earlier", 1_000))
            .await
            .unwrap();

        let chunks = index.chunks_for_meeting("UUID-A", 10).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "earlier");

        let capped = index.chunks_for_meeting("UUID-A", 1).await.unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[tokio::test]
    async fn lexical_search_ranks_by_term_frequency() {
        let index = InMemoryIndex::new();
        index
            .insert_chunk(&chunk("UUID-A", 1, "U1", "roadmap roadmap roadmap", 1))
            .await
            .unwrap();
        index
            .insert_chunk(&chunk("UUID-A", 2, "U2", "one roadmap mention", 2))
            .await
            .unwrap();
        index
            .insert_chunk(&chunk("UUID-B", 3, "U1", "roadmap elsewhere", 3))
            .await
            .unwrap();

        let hits = index
            .semantic_search("roadmap", Some("UUID-A"), None, 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.chunk_id, "UUID-A-chunk-1");

        let filtered = index
            .semantic_search("roadmap", Some("UUID-A"), Some("U2"), 10)
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].chunk.chunk_id, "UUID-A-chunk-2");

        let none = index
            .semantic_search("unrelated", Some("UUID-A"), None, 10)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn speaker_roster_is_deduplicated() {
        let index = InMemoryIndex::new();
        index
            .insert_chunk(&chunk("UUID-A", 1, "U1", "a", 1))
            .await
            .unwrap();
        index
            .insert_chunk(&chunk("UUID-A", 2, "U1", "b", 2))
            .await
            .unwrap();
        let speakers = index.speakers_for_meeting("UUID-A").await.unwrap();
        assert_eq!(speakers.len(), 1);
        assert_eq!(speakers[0].speaker_id, "U1");
    }

    #[tokio::test]
    async fn speaker_context_upsert_and_lookup() {
        let index = InMemoryIndex::new();
        let ctx = SpeakerContext {
            meeting_id: "UUID-A".to_owned(),
            speaker_id: "U1".to_owned(),
            speaker_name: "U1".to_owned(),
            summary: "talked about the roadmap".to_owned(),
            topics: vec!["roadmap".to_owned()],
            last_updated: Utc::now(),
            segment_count: 3,
        };
        index.upsert_speaker_context(&ctx).await.unwrap();
        let found = index.speaker_context("UUID-A", "U1").await.unwrap().unwrap();
        assert_eq!(found.summary, "talked about the roadmap");
        assert!(index.speaker_context("UUID-A", "U2").await.unwrap().is_none());
    }
}
