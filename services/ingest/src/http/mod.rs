//! HTTP surface: the vendor webhook plus the meeting/search/chat API.

pub mod api;
pub mod response;
pub mod webhook;

use crate::router::EventRouter;
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct HttpContext {
    pub state: Arc<AppState>,
    pub router: Arc<EventRouter>,
}

pub fn build_router(state: Arc<AppState>, router: Arc<EventRouter>) -> Router {
    Router::new()
        .route("/webhook", post(webhook::webhook))
        .route("/api/meeting/{numeric_id}/speakers", get(api::meeting_speakers))
        .route("/api/speaker/{speaker_id}/context", get(api::speaker_context))
        .route("/api/chat/{speaker_id}", post(api::chat))
        .route("/api/semantic-search", post(api::semantic_search))
        .route("/api/chunks/{meeting_id}", get(api::meeting_chunks))
        .layer(TraceLayer::new_for_http())
        .with_state(HttpContext { state, router })
}
