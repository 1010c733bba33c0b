//! HTTP surface tests: webhook validation, signature enforcement, and the
//! API endpoints' JSON contracts.

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use hmac_helper::sign_body;
use ingest::config::load_config_from_str;
use ingest::http::webhook::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
use ingest::router::EventRouter;
use ingest::state::AppState;
use std::sync::Arc;
use tower::ServiceExt;

const SECRET_TOKEN: &str = "s";

fn app() -> (axum::Router, Arc<AppState>) {
    let config = load_config_from_str(&format!(
        r#"
        schema_version = 1

        [credentials]
        client_id = "cid"
        client_secret = "csecret"
        secret_token = "{SECRET_TOKEN}"
    "#
    ))
    .unwrap();
    let state = AppState::build(config);
    let router = Arc::new(EventRouter::new(state.clone()));
    (ingest::http::build_router(state.clone(), router), state)
}

mod hmac_helper {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    /// Reference v0 signature, computed independently of the crate under
    /// test.
    pub fn sign_body(secret: &str, timestamp: &str, body: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("v0:{timestamp}:{body}").as_bytes());
        format!("v0={}", hex::encode(mac.finalize().into_bytes()))
    }
}

async fn post_json(
    app: &axum::Router,
    uri: &str,
    body: &str,
    headers: &[(&str, &str)],
) -> (StatusCode, serde_json::Value) {
    let mut request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    let response = app
        .clone()
        .oneshot(request.body(Body::from(body.to_owned())).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

async fn get_json(app: &axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

#[tokio::test]
async fn url_validation_replies_synchronously_with_the_hmac() {
    let (app, _state) = app();
    let body = r#"{"event":"endpoint.url_validation","payload":{"plainToken":"abc123"}}"#;
    let (status, value) = post_json(&app, "/webhook", body, &[]).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["plainToken"], "abc123");
    assert_eq!(
        value["encryptedToken"],
        rtms_protocol::validate_url_token("abc123", SECRET_TOKEN)
    );

    // idempotent: same token, identical bytes
    let (_, again) = post_json(&app, "/webhook", body, &[]).await;
    assert_eq!(value, again);
}

#[tokio::test]
async fn webhooks_without_a_valid_signature_are_rejected() {
    let (app, _state) = app();
    let body = r#"{"event":"meeting.rtms_stopped","payload":{"meeting_uuid":"U","rtms_stream_id":"S"}}"#;

    let (status, value) = post_json(&app, "/webhook", body, &[]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(value["error"].is_string());

    let (status, _) = post_json(
        &app,
        "/webhook",
        body,
        &[(SIGNATURE_HEADER, "v0=deadbeef"), (TIMESTAMP_HEADER, "1714000000")],
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn signed_webhooks_are_acked_immediately() {
    let (app, _state) = app();
    let body = r#"{"event":"meeting.rtms_stopped","payload":{"meeting_uuid":"U","rtms_stream_id":"S"}}"#;
    let timestamp = "1714009999";
    let signature = sign_body(SECRET_TOKEN, timestamp, body);

    let (status, value) = post_json(
        &app,
        "/webhook",
        body,
        &[
            (SIGNATURE_HEADER, signature.as_str()),
            (TIMESTAMP_HEADER, timestamp),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["success"], true);
}

#[tokio::test]
async fn malformed_webhook_bodies_get_a_json_400() {
    let (app, _state) = app();
    let (status, value) = post_json(&app, "/webhook", "{not json", &[]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(value["error"].is_string());
}

#[tokio::test]
async fn unknown_meeting_mapping_is_a_404_with_error_body() {
    let (app, _state) = app();
    let (status, value) = get_json(&app, "/api/meeting/999/speakers").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(value["error"].is_string());
}

#[tokio::test]
async fn speaker_context_without_a_doc_is_null_not_404() {
    let (app, state) = app();
    state.directory.record(111, "UUID-A").await;

    let (status, value) = get_json(&app, "/api/speaker/U1/context?meetingId=111").await;
    assert_eq!(status, StatusCode::OK);
    assert!(value["context_summary"].is_null());
    assert_eq!(value["segment_count"], 0);
}

#[tokio::test]
async fn semantic_search_returns_ranked_hits() {
    let (app, state) = app();
    state.directory.record(111, "UUID-A").await;
    state
        .index
        .insert_chunk(&ingest::transcript::ContentChunk {
            chunk_id: "UUID-A-chunk-1".to_owned(),
            meeting_id: "UUID-A".to_owned(),
            speaker_ids: vec!["U1".to_owned()],
            speaker_names: vec!["U1".to_owned()],
            text: "U1: shipping the roadmap next quarter".to_owned(),
            start_time: 1_000,
            end_time: 2_000,
        })
        .await
        .unwrap();

    let (status, value) = post_json(
        &app,
        "/api/semantic-search",
        r#"{"query":"roadmap","meetingId":"111","size":5}"#,
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["hits"].as_array().unwrap().len(), 1);
    assert_eq!(value["hits"][0]["chunk"]["chunk_id"], "UUID-A-chunk-1");

    let (status, value) = post_json(
        &app,
        "/api/semantic-search",
        r#"{"query":"unrelated topic"}"#,
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(value["hits"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn chat_falls_back_to_retrieved_text_without_an_inference_backend() {
    let (app, state) = app();
    state.directory.record(111, "UUID-A").await;
    state
        .index
        .insert_chunk(&ingest::transcript::ContentChunk {
            chunk_id: "UUID-A-chunk-1".to_owned(),
            meeting_id: "UUID-A".to_owned(),
            speaker_ids: vec!["U1".to_owned()],
            speaker_names: vec!["U1".to_owned()],
            text: "U1: the budget doubles in March".to_owned(),
            start_time: 1_000,
            end_time: 2_000,
        })
        .await
        .unwrap();

    let (status, value) = post_json(
        &app,
        "/api/chat/U1",
        r#"{"question":"what about the budget?","meetingId":"111"}"#,
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["success"], true);
    assert_eq!(value["fallback"], true);
    assert!(
        value["answer"].as_str().unwrap().contains("budget"),
        "fallback answer should surface the retrieved chunk"
    );
}

#[tokio::test]
async fn chunks_endpoint_accepts_numeric_and_uuid_meeting_ids() {
    let (app, state) = app();
    state.directory.record(111, "UUID-A").await;
    state
        .index
        .insert_chunk(&ingest::transcript::ContentChunk {
            chunk_id: "UUID-A-chunk-1".to_owned(),
            meeting_id: "UUID-A".to_owned(),
            speaker_ids: vec!["U1".to_owned()],
            speaker_names: vec!["U1".to_owned()],
            text: "U1: hello".to_owned(),
            start_time: 1_000,
            end_time: 2_000,
        })
        .await
        .unwrap();

    let (status, by_numeric) = get_json(&app, "/api/chunks/111").await;
    assert_eq!(status, StatusCode::OK);
    let (_, by_uuid) = get_json(&app, "/api/chunks/UUID-A").await;
    assert_eq!(by_numeric, by_uuid);
    assert_eq!(by_numeric["chunks"][0]["chunk_id"], "UUID-A-chunk-1");
}
