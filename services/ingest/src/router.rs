//! Lifecycle event router.
//!
//! Single entry point for webhook events: `endpoint.url_validation` is
//! answered synchronously; `<product>.rtms_started` / `rtms_stopped`
//! create and tear down stream sessions.  Everything unrecognised is
//! acknowledged and ignored.

use crate::config::ProductKind;
use crate::session::{SessionParams, spawn_session};
use crate::state::AppState;
use rtms_protocol::validate_url_token;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How a webhook event was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Synchronous `endpoint.url_validation` reply.
    Validation {
        plain_token: String,
        encrypted_token: String,
    },
    /// Recognised and processed (or queued for processing).
    Accepted,
    /// Unknown event name or unusable payload.
    Ignored,
}

#[derive(Debug, Deserialize)]
struct ValidationPayload {
    #[serde(rename = "plainToken")]
    plain_token: String,
}

#[derive(Debug, Deserialize)]
struct RtmsStartedPayload {
    #[serde(default)]
    meeting_id: Option<i64>,
    meeting_uuid: String,
    rtms_stream_id: String,
    /// Signaling endpoint for this stream.
    server_urls: String,
}

#[derive(Debug, Deserialize)]
struct RtmsStoppedPayload {
    meeting_uuid: String,
    rtms_stream_id: String,
}

pub struct EventRouter {
    state: Arc<AppState>,
}

impl EventRouter {
    pub fn new(state: Arc<AppState>) -> Self {
        EventRouter { state }
    }

    pub async fn handle_event(
        &self,
        event: &str,
        payload: &serde_json::Value,
    ) -> WebhookOutcome {
        if event == "endpoint.url_validation" {
            return self.validate(payload);
        }

        let Some((prefix, action)) = event.split_once('.') else {
            debug!(event, "unrecognised event name");
            return WebhookOutcome::Ignored;
        };
        let Some(product) = ProductKind::from_event_prefix(prefix) else {
            debug!(event, "unknown product prefix");
            return WebhookOutcome::Ignored;
        };
        match action {
            "rtms_started" => self.rtms_started(product, payload).await,
            "rtms_stopped" => self.rtms_stopped(payload).await,
            _ => {
                debug!(event, "unhandled lifecycle action");
                WebhookOutcome::Ignored
            }
        }
    }

    fn validate(&self, payload: &serde_json::Value) -> WebhookOutcome {
        let Ok(validation) = serde_json::from_value::<ValidationPayload>(payload.clone()) else {
            warn!("url_validation payload missing plainToken");
            return WebhookOutcome::Ignored;
        };
        let Some(creds) = self.state.config.credentials.resolve(ProductKind::Meeting) else {
            warn!("no credentials available for url_validation");
            return WebhookOutcome::Ignored;
        };
        let encrypted_token = validate_url_token(&validation.plain_token, &creds.secret_token);
        WebhookOutcome::Validation {
            plain_token: validation.plain_token,
            encrypted_token,
        }
    }

    async fn rtms_started(
        &self,
        product: ProductKind,
        payload: &serde_json::Value,
    ) -> WebhookOutcome {
        let started: RtmsStartedPayload = match serde_json::from_value(payload.clone()) {
            Ok(started) => started,
            Err(e) => {
                warn!(error = %e, "rtms_started payload rejected");
                return WebhookOutcome::Ignored;
            }
        };

        // Re-issuing a known rtms_started while its session is live is a
        // no-op; a terminal session record is archived and replaced.
        if let Some(existing) = self.state.registry.get(&started.rtms_stream_id).await {
            if existing.is_terminal().await {
                self.state.registry.remove(&started.rtms_stream_id).await;
            } else {
                info!(stream_id = %started.rtms_stream_id, "session already live; ignoring duplicate start");
                return WebhookOutcome::Accepted;
            }
        }

        let Some(credentials) = self.state.config.credentials.resolve(product) else {
            warn!(product = %product, "no credentials for product; stream not started");
            return WebhookOutcome::Ignored;
        };

        if let Some(numeric_id) = started.meeting_id {
            self.state
                .directory
                .record(numeric_id, &started.meeting_uuid)
                .await;
        }

        info!(
            stream_id = %started.rtms_stream_id,
            meeting_uuid = %started.meeting_uuid,
            product = %product,
            "starting stream session"
        );
        let media = &self.state.config.media;
        let handle = spawn_session(SessionParams {
            stream_id: started.rtms_stream_id.clone(),
            meeting_uuid: started.meeting_uuid.clone(),
            product,
            signaling_url: started.server_urls,
            credentials: credentials.clone(),
            subscribe_mask: media.subscribe,
            fillers_enabled: media.fillers,
            media_params: rtms_protocol::media::MediaParams {
                audio_sample_rate: rtms_protocol::media::AudioSampleRate::Sr16k,
                audio_send_rate_ms: media.audio_send_rate_ms,
                video_fps: media.video_fps,
            },
            events: self.state.events_tx(),
        });
        if !self.state.registry.add(handle.clone()).await {
            // Lost a race with a concurrent start for the same stream id.
            warn!(stream_id = %started.rtms_stream_id, "concurrent start; stopping the extra session");
            handle.stop().await;
        }
        WebhookOutcome::Accepted
    }

    async fn rtms_stopped(&self, payload: &serde_json::Value) -> WebhookOutcome {
        let stopped: RtmsStoppedPayload = match serde_json::from_value(payload.clone()) {
            Ok(stopped) => stopped,
            Err(e) => {
                warn!(error = %e, "rtms_stopped payload rejected");
                return WebhookOutcome::Ignored;
            }
        };

        if let Some(handle) = self.state.registry.get(&stopped.rtms_stream_id).await {
            info!(stream_id = %stopped.rtms_stream_id, "stopping stream session");
            handle.stop().await;
            self.state.registry.remove(&stopped.rtms_stream_id).await;
        } else {
            debug!(stream_id = %stopped.rtms_stream_id, "rtms_stopped for unknown stream");
        }

        self.state.destroy_buffer(&stopped.meeting_uuid).await;
        if let Err(e) = self.state.index.mark_meeting_ended(&stopped.meeting_uuid).await {
            warn!(meeting_uuid = %stopped.meeting_uuid, error = %e, "meeting end write failed");
        }
        self.state.broadcaster.retire(&stopped.meeting_uuid).await;
        WebhookOutcome::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    fn router() -> EventRouter {
        let config = load_config_from_str(
            r#"
            schema_version = 1

            [credentials]
            client_id = "cid"
            client_secret = "cs"
            secret_token = "s"
        "#,
        )
        .unwrap();
        EventRouter::new(AppState::build(config))
    }

    #[tokio::test]
    async fn url_validation_is_synchronous_and_deterministic() {
        let router = router();
        let payload = serde_json::json!({"plainToken": "abc123"});
        let first = router.handle_event("endpoint.url_validation", &payload).await;
        let second = router.handle_event("endpoint.url_validation", &payload).await;
        assert_eq!(first, second);

        let WebhookOutcome::Validation {
            plain_token,
            encrypted_token,
        } = first
        else {
            panic!("expected validation outcome");
        };
        assert_eq!(plain_token, "abc123");
        assert_eq!(encrypted_token, validate_url_token("abc123", "s"));
    }

    #[tokio::test]
    async fn unknown_events_are_ignored() {
        let router = router();
        let payload = serde_json::json!({});
        assert_eq!(
            router.handle_event("meeting.participant_joined", &payload).await,
            WebhookOutcome::Ignored
        );
        assert_eq!(
            router.handle_event("unrelated", &payload).await,
            WebhookOutcome::Ignored
        );
        assert_eq!(
            router.handle_event("fax.rtms_started", &payload).await,
            WebhookOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn rtms_stopped_for_unknown_stream_still_acks() {
        let router = router();
        let payload = serde_json::json!({
            "meeting_uuid": "UUID-A",
            "rtms_stream_id": "S-missing"
        });
        assert_eq!(
            router.handle_event("meeting.rtms_stopped", &payload).await,
            WebhookOutcome::Accepted
        );
    }

    #[tokio::test]
    async fn rtms_started_records_the_meeting_mapping() {
        let router = router();
        let payload = serde_json::json!({
            "meeting_id": 111,
            "meeting_uuid": "UUID-A",
            "rtms_stream_id": "S1",
            // nothing is listening here; the session will retry in the
            // background until stopped
            "server_urls": "ws://127.0.0.1:1/signaling"
        });
        assert_eq!(
            router.handle_event("meeting.rtms_started", &payload).await,
            WebhookOutcome::Accepted
        );
        assert_eq!(
            router.state.directory.resolve(111).await.as_deref(),
            Some("UUID-A")
        );
        assert!(router.state.registry.has("S1").await);

        // duplicate start while live: no-op
        assert_eq!(
            router.handle_event("meeting.rtms_started", &payload).await,
            WebhookOutcome::Accepted
        );
        assert_eq!(router.state.registry.size().await, 1);

        let stop = serde_json::json!({
            "meeting_uuid": "UUID-A",
            "rtms_stream_id": "S1"
        });
        router.handle_event("meeting.rtms_stopped", &stop).await;
        assert!(!router.state.registry.has("S1").await);
    }
}
