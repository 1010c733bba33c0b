//! Bidirectional meeting identity mapping.
//!
//! Two identifiers coexist: the numeric public id and the opaque session
//! UUID.  Writes go through to the index adapter; reads hit an in-memory
//! cache first.  All internal indexing keys on the UUID — the numeric id
//! only ever appears at the HTTP edge.

use crate::adapters::IndexWriter;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

pub struct MeetingDirectory {
    index: Arc<dyn IndexWriter>,
    cache: RwLock<HashMap<i64, String>>,
}

impl MeetingDirectory {
    pub fn new(index: Arc<dyn IndexWriter>) -> Self {
        MeetingDirectory {
            index,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Record `numericId → uuid`, writing through to durable storage.
    ///
    /// A write-through failure is logged and swallowed: the in-memory
    /// mapping stays authoritative for the rest of this process lifetime.
    pub async fn record(&self, numeric_id: i64, uuid: &str) {
        self.cache
            .write()
            .await
            .insert(numeric_id, uuid.to_owned());
        if let Err(e) = self.index.persist_meeting_mapping(numeric_id, uuid).await {
            warn!(numeric_id, error = %e, "meeting mapping write-through failed");
        }
    }

    /// Resolve a numeric id, consulting the cache first and the index on a
    /// miss (caching the answer).
    pub async fn resolve(&self, numeric_id: i64) -> Option<String> {
        if let Some(uuid) = self.cache.read().await.get(&numeric_id) {
            return Some(uuid.clone());
        }
        match self.index.resolve_meeting_uuid(numeric_id).await {
            Ok(Some(uuid)) => {
                self.cache
                    .write()
                    .await
                    .insert(numeric_id, uuid.clone());
                Some(uuid)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(numeric_id, error = %e, "meeting mapping lookup failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryIndex;

    #[tokio::test]
    async fn record_then_resolve_round_trips() {
        let index = Arc::new(InMemoryIndex::new());
        let directory = MeetingDirectory::new(index.clone());
        directory.record(111, "UUID-A").await;
        assert_eq!(directory.resolve(111).await.as_deref(), Some("UUID-A"));
        // durable side saw the write-through
        assert_eq!(
            index.resolve_meeting_uuid(111).await.unwrap().as_deref(),
            Some("UUID-A")
        );
    }

    #[tokio::test]
    async fn resolve_falls_back_to_the_index_and_caches() {
        let index = Arc::new(InMemoryIndex::new());
        index.persist_meeting_mapping(222, "UUID-B").await.unwrap();

        let directory = MeetingDirectory::new(index);
        assert_eq!(directory.resolve(222).await.as_deref(), Some("UUID-B"));
        assert!(directory.cache.read().await.contains_key(&222));
        assert_eq!(directory.resolve(333).await, None);
    }
}
