//! Meeting / speaker / search / chat API.
//!
//! Meeting parameters accept either the numeric public id (resolved
//! through the directory, which also discovers mappings from the index)
//! or the opaque UUID directly.  Chat and search degrade to textual
//! fallbacks when the inference backend is unavailable.

use super::HttpContext;
use super::response::{internal_error, not_found};
use crate::adapters::SearchHit;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::warn;

const CHUNKS_LIMIT: usize = 1_000;
const CHAT_HITS: usize = 5;
const DEFAULT_SEARCH_SIZE: usize = 10;
const MAX_SEARCH_SIZE: usize = 100;

/// Accept `"12345"` (numeric public id) or a UUID string.
async fn resolve_meeting_param(ctx: &HttpContext, raw: &str) -> Option<String> {
    match raw.parse::<i64>() {
        Ok(numeric_id) => ctx.state.directory.resolve(numeric_id).await,
        Err(_) => Some(raw.to_owned()),
    }
}

pub async fn meeting_speakers(
    State(ctx): State<HttpContext>,
    Path(numeric_id): Path<i64>,
) -> Response {
    let Some(uuid) = ctx.state.directory.resolve(numeric_id).await else {
        return not_found(format!("no mapping for meeting {numeric_id}"));
    };
    let speakers = match ctx.state.index.speakers_for_meeting(&uuid).await {
        Ok(speakers) => speakers,
        Err(e) => return internal_error(e),
    };
    Json(serde_json::json!({
        "meeting_id": numeric_id,
        "uuid": uuid,
        "speakers": speakers,
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct ContextQuery {
    #[serde(rename = "meetingId")]
    meeting_id: String,
}

pub async fn speaker_context(
    State(ctx): State<HttpContext>,
    Path(speaker_id): Path<String>,
    Query(query): Query<ContextQuery>,
) -> Response {
    let Some(uuid) = resolve_meeting_param(&ctx, &query.meeting_id).await else {
        return not_found(format!("no mapping for meeting {}", query.meeting_id));
    };
    match ctx.state.index.speaker_context(&uuid, &speaker_id).await {
        Ok(Some(doc)) => Json(serde_json::json!({
            "meeting_id": doc.meeting_id,
            "speaker_id": doc.speaker_id,
            "speaker_name": doc.speaker_name,
            "context_summary": doc.summary,
            "topics": doc.topics,
            "last_updated": doc.last_updated.to_rfc3339(),
            "segment_count": doc.segment_count,
        }))
        .into_response(),
        Ok(None) => Json(serde_json::json!({
            "meeting_id": uuid,
            "speaker_id": speaker_id,
            "context_summary": serde_json::Value::Null,
            "topics": [],
            "segment_count": 0,
        }))
        .into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    question: String,
    #[serde(rename = "meetingId")]
    meeting_id: String,
}

pub async fn chat(
    State(ctx): State<HttpContext>,
    Path(speaker_id): Path<String>,
    Json(body): Json<ChatBody>,
) -> Response {
    let Some(uuid) = resolve_meeting_param(&ctx, &body.meeting_id).await else {
        return not_found(format!("no mapping for meeting {}", body.meeting_id));
    };

    let context = ctx
        .state
        .index
        .speaker_context(&uuid, &speaker_id)
        .await
        .ok()
        .flatten();
    let hits = match ctx
        .state
        .searcher
        .semantic_search(&body.question, Some(&uuid), Some(&speaker_id), CHAT_HITS)
        .await
    {
        Ok(hits) => hits,
        Err(e) => {
            warn!(error = %e, "search failed while building chat context");
            Vec::new()
        }
    };

    let speaker_name = context
        .as_ref()
        .map(|c| c.speaker_name.clone())
        .unwrap_or_else(|| speaker_id.clone());
    let summary = context
        .as_ref()
        .map(|c| c.summary.clone())
        .unwrap_or_default();
    let excerpts = hits
        .iter()
        .map(|hit| hit.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n---\n");
    let prompt = format!(
        "Answer a question about what {speaker_name} said in a meeting.\n\
         Rolling summary of the speaker: {summary}\n\
         Relevant transcript excerpts:\n{excerpts}\n\
         Question: {}\n\
         Answer concisely based only on the material above.",
        body.question
    );

    match ctx.state.summariser.complete(&prompt).await {
        Ok(answer) => Json(serde_json::json!({
            "success": true,
            "answer": answer.trim(),
        }))
        .into_response(),
        Err(e) => {
            warn!(error = %e, "completion unavailable; falling back to retrieved text");
            Json(serde_json::json!({
                "success": true,
                "answer": fallback_answer(&speaker_name, &summary, &hits),
                "fallback": true,
            }))
            .into_response()
        }
    }
}

fn fallback_answer(speaker_name: &str, summary: &str, hits: &[SearchHit]) -> String {
    let mut parts = Vec::new();
    if !summary.is_empty() {
        parts.push(format!("What {speaker_name} has said so far: {summary}"));
    }
    if let Some(best) = hits.first() {
        parts.push(format!("Most relevant transcript:\n{}", best.chunk.text));
    }
    if parts.is_empty() {
        format!("No recorded context for {speaker_name} yet.")
    } else {
        parts.join("\n\n")
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchBody {
    query: String,
    #[serde(rename = "meetingId")]
    meeting_id: Option<String>,
    #[serde(rename = "speakerId")]
    speaker_id: Option<String>,
    size: Option<usize>,
}

pub async fn semantic_search(
    State(ctx): State<HttpContext>,
    Json(body): Json<SearchBody>,
) -> Response {
    let meeting_uuid = match &body.meeting_id {
        Some(raw) => match resolve_meeting_param(&ctx, raw).await {
            Some(uuid) => Some(uuid),
            None => return not_found(format!("no mapping for meeting {raw}")),
        },
        None => None,
    };
    let limit = body.size.unwrap_or(DEFAULT_SEARCH_SIZE).min(MAX_SEARCH_SIZE);
    match ctx
        .state
        .searcher
        .semantic_search(
            &body.query,
            meeting_uuid.as_deref(),
            body.speaker_id.as_deref(),
            limit,
        )
        .await
    {
        Ok(hits) => Json(serde_json::json!({ "hits": hits })).into_response(),
        Err(e) => internal_error(e),
    }
}

pub async fn meeting_chunks(
    State(ctx): State<HttpContext>,
    Path(meeting_id): Path<String>,
) -> Response {
    let Some(uuid) = resolve_meeting_param(&ctx, &meeting_id).await else {
        return not_found(format!("no mapping for meeting {meeting_id}"));
    };
    match ctx.state.index.chunks_for_meeting(&uuid, CHUNKS_LIMIT).await {
        Ok(chunks) => Json(serde_json::json!({
            "meeting_id": uuid,
            "chunks": chunks,
        }))
        .into_response(),
        Err(e) => internal_error(e),
    }
}
