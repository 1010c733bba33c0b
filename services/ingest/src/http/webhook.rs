//! The vendor webhook.
//!
//! `endpoint.url_validation` is the only synchronous path; every other
//! event is signature-checked against the raw body, acknowledged with 200,
//! and dispatched asynchronously.

use super::HttpContext;
use super::response::{bad_request, unauthorized};
use crate::config::ProductKind;
use crate::router::WebhookOutcome;
use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use rtms_protocol::verify_webhook_signature;
use serde::Deserialize;
use tracing::{debug, warn};

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";

#[derive(Debug, Deserialize)]
struct WebhookBody {
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
}

pub async fn webhook(
    State(ctx): State<HttpContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Ok(raw_body) = std::str::from_utf8(&body) else {
        return bad_request("body is not UTF-8");
    };
    let parsed: WebhookBody = match serde_json::from_str(raw_body) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, "webhook body rejected");
            return bad_request("invalid JSON body");
        }
    };

    if parsed.event == "endpoint.url_validation" {
        return match ctx.router.handle_event(&parsed.event, &parsed.payload).await {
            WebhookOutcome::Validation {
                plain_token,
                encrypted_token,
            } => Json(serde_json::json!({
                "plainToken": plain_token,
                "encryptedToken": encrypted_token,
            }))
            .into_response(),
            _ => bad_request("validation payload missing plainToken"),
        };
    }

    if let Some(creds) = ctx.state.config.credentials.resolve(ProductKind::Meeting) {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        let timestamp = headers
            .get(TIMESTAMP_HEADER)
            .and_then(|v| v.to_str().ok());
        let verified = matches!((signature, timestamp), (Some(sig), Some(ts))
            if verify_webhook_signature(sig, ts, raw_body, &creds.secret_token));
        if !verified {
            warn!(event = %parsed.event, "webhook signature verification failed");
            return unauthorized("signature verification failed");
        }
    }

    // Ack now, work later.
    debug!(event = %parsed.event, "webhook accepted for async dispatch");
    let router = ctx.router.clone();
    tokio::spawn(async move {
        router.handle_event(&parsed.event, &parsed.payload).await;
    });
    Json(serde_json::json!({ "success": true })).into_response()
}
