//! End-to-end transcript path: vendor frames → session → transcript buffer
//! → chunk + speaker context in the index, with live client echoes.

use axum::body::{Body, to_bytes};
use axum::http::Request;
use ingest::config::load_config_from_str;
use ingest::router::EventRouter;
use ingest::state::AppState;
use rtms_protocol::media::MediaKind;
use rtms_test_utils::{MockRtmsConfig, MockRtmsServer, frames, wait_for};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn transcripts_become_chunks_and_speaker_context() {
    let config = load_config_from_str(
        r#"
        schema_version = 1

        [media]
        subscribe = 32

        [credentials]
        client_id = "cid"
        client_secret = "csecret"
        secret_token = "stoken"
    "#,
    )
    .unwrap();
    let state = AppState::build(config);
    let router = Arc::new(EventRouter::new(state.clone()));

    let server = MockRtmsServer::start(MockRtmsConfig {
        available: vec![MediaKind::Transcript],
        ..MockRtmsConfig::default()
    })
    .await
    .unwrap();

    let mut live = state.broadcaster.subscribe("UUID-A").await;

    router
        .handle_event(
            "meeting.rtms_started",
            &serde_json::json!({
                "meeting_id": 111,
                "meeting_uuid": "UUID-A",
                "rtms_stream_id": "S1",
                "server_urls": server.signaling_url(),
            }),
        )
        .await;
    assert!(
        wait_for(WAIT, || async { server.media_accepts_total().await == 1 }).await,
        "transcript socket never connected"
    );

    let base = 1_714_000_000_000_u64;
    for (text, offset) in [("hello", 0_u64), ("world", 2_000), ("again", 4_000)] {
        assert!(
            server
                .push_media(
                    MediaKind::Transcript,
                    &frames::transcript_frame(7, "U1", text, base + offset),
                )
                .await
        );
    }

    // each transcript fragment reaches live clients as it arrives
    for expected in ["hello", "world", "again"] {
        let event = tokio::time::timeout(WAIT, live.recv())
            .await
            .expect("live transcript timed out")
            .unwrap();
        assert_eq!(event["type"], "transcript");
        assert_eq!(event["payload"]["text"], expected);
        assert_eq!(event["payload"]["user_name"], "U1");
    }

    // meeting over: the buffer flushes its pending summary and final chunk
    router
        .handle_event(
            "meeting.rtms_stopped",
            &serde_json::json!({"meeting_uuid": "UUID-A", "rtms_stream_id": "S1"}),
        )
        .await;

    assert!(
        wait_for(WAIT, || async {
            !state
                .index
                .chunks_for_meeting("UUID-A", 10)
                .await
                .unwrap()
                .is_empty()
        })
        .await,
        "chunk never reached the index"
    );
    let chunks = state.index.chunks_for_meeting("UUID-A", 10).await.unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].chunk_id, "UUID-A-chunk-1");
    assert_eq!(chunks[0].text, "U1: hello\nU1: world\nU1: again");
    assert_eq!(chunks[0].speaker_ids, vec!["7"]);
    assert_eq!(chunks[0].start_time, base);
    assert_eq!(chunks[0].end_time, base + 4_000);

    // the destroy-path summary produced a speaker context doc
    assert!(
        wait_for(WAIT, || async {
            state
                .index
                .speaker_context("UUID-A", "7")
                .await
                .unwrap()
                .is_some()
        })
        .await,
        "speaker context never materialised"
    );
    let ctx = state
        .index
        .speaker_context("UUID-A", "7")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ctx.summary, "hello world again");
    assert_eq!(ctx.segment_count, 3);
    assert_eq!(ctx.speaker_name, "U1");

    // and the HTTP surface serves the result, resolving the numeric id
    let app = ingest::http::build_router(state.clone(), router);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/chunks/111")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["meeting_id"], "UUID-A");
    assert_eq!(value["chunks"][0]["text"], "U1: hello\nU1: world\nU1: again");
}
