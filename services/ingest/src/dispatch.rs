//! Dispatcher pumps: session events → transcript buffers + live clients,
//! and buffer signals → index + summariser.
//!
//! Adapter failures are logged at warn and swallowed per item — the pumps
//! never stall ingestion on a slow or broken downstream.

use crate::adapters::SpeakerContext;
use crate::session::events::{StreamEvent, StreamEventKind};
use crate::state::AppState;
use crate::transcript::{BufferSignal, SummarizeRequest, Utterance};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Consume session events: transcripts feed the meeting's buffer, and the
/// client-facing kinds fan out to the broadcaster.  Raw media buffers stay
/// inside the process (the meeting-client UI is not a media sink).
pub async fn run_event_pump(state: Arc<AppState>, mut events: mpsc::Receiver<StreamEvent>) {
    while let Some(event) = events.recv().await {
        if let StreamEventKind::Transcript(segment) = &event.kind {
            let buffer = state.ensure_buffer(&event.meeting_uuid).await;
            buffer.append(to_utterance(segment)).await;
        }
        if let Some(payload) = client_payload(&event) {
            state.broadcaster.publish(&event.meeting_uuid, payload).await;
        }
    }
    debug!("event pump finished");
}

fn to_utterance(segment: &crate::session::events::TranscriptSegment) -> Utterance {
    let speaker_id = segment
        .user_id
        .map(|id| id.to_string())
        .or_else(|| segment.user_name.clone())
        .unwrap_or_else(|| "unknown".to_owned());
    Utterance {
        speaker_id,
        speaker_name: segment
            .user_name
            .clone()
            .unwrap_or_else(|| "Unknown".to_owned()),
        text: segment.text.clone(),
        timestamp: segment.timestamp,
    }
}

/// JSON pushed to live meeting clients; `None` for kinds that stay
/// internal (raw audio/video/share buffers).
fn client_payload(event: &StreamEvent) -> Option<serde_json::Value> {
    let body = match &event.kind {
        StreamEventKind::Transcript(segment) => serde_json::json!({
            "user_id": segment.user_id,
            "user_name": segment.user_name,
            "text": segment.text,
            "timestamp": segment.timestamp,
        }),
        StreamEventKind::Chat(message) => serde_json::json!({
            "user_id": message.user_id,
            "user_name": message.user_name,
            "text": message.text,
            "timestamp": message.timestamp,
        }),
        StreamEventKind::Signaling {
            event_type,
            timestamp,
            content,
        } => serde_json::json!({
            "event_type": event_type,
            "timestamp": timestamp,
            "content": content,
        }),
        StreamEventKind::StreamStateChanged { state, reason, timestamp } => serde_json::json!({
            "state": state,
            "reason": reason,
            "timestamp": timestamp,
        }),
        StreamEventKind::SessionStateChanged { state, stop_reason, timestamp } => serde_json::json!({
            "state": state,
            "stop_reason": stop_reason,
            "timestamp": timestamp,
        }),
        StreamEventKind::Error(error) => serde_json::json!(error),
        StreamEventKind::Audio(_) | StreamEventKind::Video(_) | StreamEventKind::ShareScreen(_) => {
            return None;
        }
    };
    Some(serde_json::json!({
        "type": event.kind.tag(),
        "meeting_uuid": event.meeting_uuid,
        "stream_id": event.stream_id,
        "payload": body,
    }))
}

/// Consume transcript buffer signals: chunks into the index, summaries
/// through the summariser into speaker context docs, both echoed to live
/// clients.
pub async fn run_signal_pump(state: Arc<AppState>, mut signals: mpsc::Receiver<BufferSignal>) {
    while let Some(signal) = signals.recv().await {
        match signal {
            BufferSignal::Chunk(chunk) => {
                if let Err(e) = state.index.insert_chunk(&chunk).await {
                    warn!(chunk_id = %chunk.chunk_id, error = %e, "chunk insert failed; chunk lost");
                }
                let meeting_id = chunk.meeting_id.clone();
                state
                    .broadcaster
                    .publish(
                        &meeting_id,
                        serde_json::json!({"type": "chunk", "payload": chunk}),
                    )
                    .await;
            }
            BufferSignal::Summarize(request) => {
                summarise_speaker(&state, request).await;
            }
        }
    }
    debug!("signal pump finished");
}

async fn summarise_speaker(state: &AppState, request: SummarizeRequest) {
    let prior = match state
        .index
        .speaker_context(&request.meeting_id, &request.speaker_id)
        .await
    {
        Ok(prior) => prior,
        Err(e) => {
            warn!(speaker_id = %request.speaker_id, error = %e, "prior context lookup failed");
            None
        }
    };

    let summary = match state.summariser.summarise(&request, prior.as_ref()).await {
        Ok(summary) => summary,
        Err(e) => {
            warn!(
                meeting_id = %request.meeting_id,
                speaker_id = %request.speaker_id,
                error = %e,
                "summarisation failed; speaker context unchanged"
            );
            return;
        }
    };

    let ctx = SpeakerContext {
        meeting_id: request.meeting_id.clone(),
        speaker_id: request.speaker_id.clone(),
        speaker_name: request.speaker_name.clone(),
        summary: summary.summary,
        topics: summary.topics,
        last_updated: Utc::now(),
        segment_count: request.segment_count,
    };
    if let Err(e) = state.index.upsert_speaker_context(&ctx).await {
        warn!(doc_id = %ctx.doc_id(), error = %e, "speaker context upsert failed");
    }
    let meeting_id = ctx.meeting_id.clone();
    state
        .broadcaster
        .publish(
            &meeting_id,
            serde_json::json!({"type": "speaker_context", "payload": ctx}),
        )
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProductKind;
    use crate::session::events::TranscriptSegment;

    fn segment(user_id: Option<i64>, user_name: Option<&str>) -> TranscriptSegment {
        TranscriptSegment {
            user_id,
            user_name: user_name.map(str::to_owned),
            text: "hello".to_owned(),
            timestamp: 1_000,
            start_time: None,
            end_time: None,
            language: None,
            attribute: None,
        }
    }

    #[test]
    fn utterance_speaker_identity_prefers_user_id() {
        let u = to_utterance(&segment(Some(42), Some("Ada")));
        assert_eq!(u.speaker_id, "42");
        assert_eq!(u.speaker_name, "Ada");

        let u = to_utterance(&segment(None, Some("Ada")));
        assert_eq!(u.speaker_id, "Ada");

        let u = to_utterance(&segment(None, None));
        assert_eq!(u.speaker_id, "unknown");
        assert_eq!(u.speaker_name, "Unknown");
    }

    #[test]
    fn raw_media_never_reaches_clients() {
        let event = StreamEvent {
            meeting_uuid: "UUID-A".to_owned(),
            stream_id: "S1".to_owned(),
            product: ProductKind::Meeting,
            kind: StreamEventKind::Audio(crate::session::events::MediaFrame {
                user_id: None,
                user_name: None,
                buffer: bytes::Bytes::from_static(b"pcm"),
                timestamp: 1,
            }),
        };
        assert!(client_payload(&event).is_none());

        let event = StreamEvent {
            kind: StreamEventKind::Transcript(segment(Some(1), Some("Ada"))),
            ..event
        };
        let payload = client_payload(&event).unwrap();
        assert_eq!(payload["type"], "transcript");
        assert_eq!(payload["payload"]["text"], "hello");
    }
}
