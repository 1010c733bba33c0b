//! JSON response helpers.
//!
//! Endpoints always answer JSON: 4xx carries `{"error": …}`, server-side
//! failures carry `{"success": false, "error": …}`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::fmt::Display;

pub fn error_json(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

pub fn bad_request(message: impl Into<String>) -> Response {
    error_json(StatusCode::BAD_REQUEST, message)
}

pub fn not_found(message: impl Into<String>) -> Response {
    error_json(StatusCode::NOT_FOUND, message)
}

pub fn unauthorized(message: impl Into<String>) -> Response {
    error_json(StatusCode::UNAUTHORIZED, message)
}

pub fn internal_error(err: impl Display) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "success": false, "error": err.to_string() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn four_xx_bodies_carry_the_error_field() {
        let response = not_found("unknown meeting");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["error"], "unknown meeting");
    }

    #[tokio::test]
    async fn internal_errors_carry_the_failure_envelope() {
        let response = internal_error("index offline");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["success"], false);
        assert_eq!(parsed["error"], "index offline");
    }
}
