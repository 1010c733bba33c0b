//! JSON wire framing for the signaling and media sockets.
//!
//! Every frame is a JSON object tagged by an integer `msg_type`.  Outbound
//! frames are `Serialize` structs that carry their tag; inbound text decodes
//! through [`parse_server_frame`], which dispatches on the tag.  Unknown
//! tags are preserved as [`ServerFrame::Unknown`] so callers can log and
//! drop them without treating the frame as a protocol error.

use crate::media::{MediaKind, MediaMask, MediaParams};
use serde::{Deserialize, Serialize};

/// Frame tags.  14–18 are the per-kind media payloads.
pub mod msg_type {
    pub const SIGNALING_HANDSHAKE_REQ: u8 = 1;
    pub const SIGNALING_HANDSHAKE_RESP: u8 = 2;
    pub const MEDIA_HANDSHAKE_REQ: u8 = 3;
    pub const MEDIA_HANDSHAKE_RESP: u8 = 4;
    pub const EVENT_SUBSCRIPTION: u8 = 5;
    pub const SIGNALING_EVENT: u8 = 6;
    pub const MEDIA_READY: u8 = 7;
    pub const STREAM_STATE_CHANGED: u8 = 8;
    pub const SESSION_STATE_CHANGED: u8 = 9;
    pub const KEEP_ALIVE_REQ: u8 = 12;
    pub const KEEP_ALIVE_RESP: u8 = 13;
    pub const MEDIA_AUDIO: u8 = 14;
    pub const MEDIA_VIDEO: u8 = 15;
    pub const MEDIA_SHARE: u8 = 16;
    pub const MEDIA_TRANSCRIPT: u8 = 17;
    pub const MEDIA_CHAT: u8 = 18;
}

/// `msg_type 8` stream states.
pub mod stream_state {
    pub const INACTIVE: u8 = 0;
    pub const ACTIVE: u8 = 1;
    pub const INTERRUPTED: u8 = 2;
    pub const PAUSED: u8 = 3;
    pub const TERMINATED: u8 = 4;
}

/// `msg_type 8` / `msg_type 9` stop reasons.
pub mod stop_reason {
    pub const UNKNOWN: u8 = 0;
    pub const HOST_STOPPED: u8 = 5;
    pub const MEETING_ENDED: u8 = 6;
}

/// Signaling event names carried in `msg_type 5` subscriptions and
/// `msg_type 6` notifications.
pub mod signaling_events {
    pub const ACTIVE_SPEAKER_CHANGE: &str = "ACTIVE_SPEAKER_CHANGE";
    pub const PARTICIPANT_JOIN: &str = "PARTICIPANT_JOIN";
    pub const PARTICIPANT_LEAVE: &str = "PARTICIPANT_LEAVE";
    pub const SHARING_START: &str = "SHARING_START";
    pub const SHARING_STOP: &str = "SHARING_STOP";
}

pub const PROTOCOL_VERSION: u8 = 1;

// ---------------------------------------------------------------------------
// Outbound frames (client -> server)
// ---------------------------------------------------------------------------

/// `msg_type 1` — signaling handshake.
#[derive(Debug, Clone, Serialize)]
pub struct SignalingHandshake {
    pub msg_type: u8,
    pub protocol_version: u8,
    pub meeting_uuid: String,
    pub rtms_stream_id: String,
    pub sequence: u64,
    pub signature: String,
}

impl SignalingHandshake {
    pub fn new(meeting_uuid: &str, stream_id: &str, signature: String) -> Self {
        SignalingHandshake {
            msg_type: msg_type::SIGNALING_HANDSHAKE_REQ,
            protocol_version: PROTOCOL_VERSION,
            meeting_uuid: meeting_uuid.to_owned(),
            rtms_stream_id: stream_id.to_owned(),
            sequence: 0,
            signature,
        }
    }
}

/// `msg_type 3` — media handshake, one per sub-socket.
#[derive(Debug, Clone, Serialize)]
pub struct MediaHandshake {
    pub msg_type: u8,
    pub protocol_version: u8,
    pub meeting_uuid: String,
    pub rtms_stream_id: String,
    pub signature: String,
    /// The single [`MediaMask`] bit this socket carries.
    pub media_type: u8,
    pub media_params: MediaParams,
}

impl MediaHandshake {
    pub fn new(
        meeting_uuid: &str,
        stream_id: &str,
        signature: String,
        kind: MediaKind,
        media_params: MediaParams,
    ) -> Self {
        MediaHandshake {
            msg_type: msg_type::MEDIA_HANDSHAKE_REQ,
            protocol_version: PROTOCOL_VERSION,
            meeting_uuid: meeting_uuid.to_owned(),
            rtms_stream_id: stream_id.to_owned(),
            signature,
            media_type: kind.flag().bits(),
            media_params,
        }
    }
}

/// One entry in a `msg_type 5` subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSubscriptionEntry {
    pub event_type: String,
    pub subscribe: bool,
}

/// `msg_type 5` — signaling event subscription.
#[derive(Debug, Clone, Serialize)]
pub struct EventSubscription {
    pub msg_type: u8,
    pub events: Vec<EventSubscriptionEntry>,
}

impl EventSubscription {
    pub fn subscribe(event_types: &[&str]) -> Self {
        EventSubscription {
            msg_type: msg_type::EVENT_SUBSCRIPTION,
            events: event_types
                .iter()
                .map(|e| EventSubscriptionEntry {
                    event_type: (*e).to_owned(),
                    subscribe: true,
                })
                .collect(),
        }
    }
}

/// `msg_type 7` — sent on the signaling socket once a media sub-socket is
/// authenticated.
#[derive(Debug, Clone, Serialize)]
pub struct MediaReady {
    pub msg_type: u8,
    pub rtms_stream_id: String,
    /// The single [`MediaMask`] bit that became ready.
    pub media_type: u8,
}

impl MediaReady {
    pub fn new(stream_id: &str, kind: MediaKind) -> Self {
        MediaReady {
            msg_type: msg_type::MEDIA_READY,
            rtms_stream_id: stream_id.to_owned(),
            media_type: kind.flag().bits(),
        }
    }
}

/// `msg_type 13` — keep-alive echo; `timestamp` is copied from the request.
#[derive(Debug, Clone, Serialize)]
pub struct KeepAliveResponse {
    pub msg_type: u8,
    pub timestamp: u64,
}

impl KeepAliveResponse {
    pub fn echo(timestamp: u64) -> Self {
        KeepAliveResponse {
            msg_type: msg_type::KEEP_ALIVE_RESP,
            timestamp,
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound frames (server -> client)
// ---------------------------------------------------------------------------

/// Per-kind media socket URLs advertised in the signaling handshake
/// response.  A kind is "available" iff its URL is present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerUrls {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sharescreen: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat: Option<String>,
}

impl ServerUrls {
    pub fn url_for(&self, kind: MediaKind) -> Option<&str> {
        match kind {
            MediaKind::Audio => self.audio.as_deref(),
            MediaKind::Video => self.video.as_deref(),
            MediaKind::ShareScreen => self.sharescreen.as_deref(),
            MediaKind::Transcript => self.transcript.as_deref(),
            MediaKind::Chat => self.chat.as_deref(),
        }
    }

    /// OR of the kinds a URL was supplied for.
    pub fn available_mask(&self) -> MediaMask {
        let mut mask = MediaMask::empty();
        for kind in MediaKind::ALL {
            if self.url_for(kind).is_some() {
                mask |= kind.flag();
            }
        }
        mask
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaServerInfo {
    #[serde(default)]
    pub server_urls: ServerUrls,
}

/// `msg_type 2` — signaling handshake response.
#[derive(Debug, Clone, Deserialize)]
pub struct HandshakeAck {
    pub status_code: i64,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub sequence: Option<u64>,
    #[serde(default)]
    pub media_server: Option<MediaServerInfo>,
}

/// `msg_type 4` — media handshake response.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaHandshakeAck {
    pub status_code: i64,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub media_params: Option<MediaParams>,
}

/// `msg_type 6` — non-media signaling event (active speaker, join, leave,
/// sharing start/stop, …).
#[derive(Debug, Clone, Deserialize)]
pub struct SignalingEvent {
    pub event_type: String,
    #[serde(default)]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub content: serde_json::Value,
}

/// `msg_type 8`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StreamStateChange {
    pub state: u8,
    #[serde(default)]
    pub reason: u8,
    #[serde(default)]
    pub timestamp: Option<u64>,
}

impl StreamStateChange {
    /// `state=4, reason=6` — the meeting ended; the session must not
    /// reconnect.
    pub fn is_meeting_ended(self) -> bool {
        self.state == stream_state::TERMINATED && self.reason == stop_reason::MEETING_ENDED
    }
}

/// `msg_type 9`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SessionStateChange {
    pub state: u8,
    #[serde(default)]
    pub stop_reason: Option<u8>,
    #[serde(default)]
    pub timestamp: Option<u64>,
}

/// `msg_type 12` — server-initiated keep-alive; echo the timestamp back.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct KeepAlive {
    pub timestamp: u64,
}

/// Payload body for `msg_type 14–18`.  `data` is base64; for transcript and
/// chat it decodes to UTF-8 text.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaContent {
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub start_time: Option<u64>,
    #[serde(default)]
    pub end_time: Option<u64>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub attribute: Option<String>,
}

/// Every frame a client socket can receive, decoded.
#[derive(Debug, Clone)]
pub enum ServerFrame {
    SignalingHandshakeAck(HandshakeAck),
    MediaHandshakeAck(MediaHandshakeAck),
    Event(SignalingEvent),
    StreamState(StreamStateChange),
    SessionState(SessionStateChange),
    KeepAlive(KeepAlive),
    Media { kind: MediaKind, content: MediaContent },
    /// A tag this client does not understand; log and drop.
    Unknown(u8),
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame has no integer msg_type")]
    MissingMsgType,
}

/// Decode one inbound text frame.
///
/// Malformed JSON and frames missing the tag are errors (callers log at
/// warn and drop the packet); an unrecognised tag is NOT an error.
pub fn parse_server_frame(text: &str) -> Result<ServerFrame, WireError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let tag = value
        .get("msg_type")
        .and_then(serde_json::Value::as_u64)
        .ok_or(WireError::MissingMsgType)?;
    let tag = u8::try_from(tag).map_err(|_| WireError::MissingMsgType)?;

    let media_kind = |tag: u8| match tag {
        msg_type::MEDIA_AUDIO => Some(MediaKind::Audio),
        msg_type::MEDIA_VIDEO => Some(MediaKind::Video),
        msg_type::MEDIA_SHARE => Some(MediaKind::ShareScreen),
        msg_type::MEDIA_TRANSCRIPT => Some(MediaKind::Transcript),
        msg_type::MEDIA_CHAT => Some(MediaKind::Chat),
        _ => None,
    };

    match tag {
        msg_type::SIGNALING_HANDSHAKE_RESP => {
            Ok(ServerFrame::SignalingHandshakeAck(serde_json::from_value(value)?))
        }
        msg_type::MEDIA_HANDSHAKE_RESP => {
            Ok(ServerFrame::MediaHandshakeAck(serde_json::from_value(value)?))
        }
        msg_type::SIGNALING_EVENT => Ok(ServerFrame::Event(serde_json::from_value(value)?)),
        msg_type::STREAM_STATE_CHANGED => {
            Ok(ServerFrame::StreamState(serde_json::from_value(value)?))
        }
        msg_type::SESSION_STATE_CHANGED => {
            Ok(ServerFrame::SessionState(serde_json::from_value(value)?))
        }
        msg_type::KEEP_ALIVE_REQ => Ok(ServerFrame::KeepAlive(serde_json::from_value(value)?)),
        _ => match media_kind(tag) {
            Some(kind) => {
                let content = match value.get("content") {
                    Some(content) => serde_json::from_value(content.clone())?,
                    None => MediaContent::default(),
                };
                Ok(ServerFrame::Media { kind, content })
            }
            None => Ok(ServerFrame::Unknown(tag)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_frames_carry_their_tag() {
        let hs = SignalingHandshake::new("UUID-A", "S1", "sig".to_owned());
        let json = serde_json::to_value(&hs).unwrap();
        assert_eq!(json["msg_type"], 1);
        assert_eq!(json["rtms_stream_id"], "S1");

        let mh = MediaHandshake::new(
            "UUID-A",
            "S1",
            "sig".to_owned(),
            MediaKind::Transcript,
            MediaParams::default(),
        );
        let json = serde_json::to_value(&mh).unwrap();
        assert_eq!(json["msg_type"], 3);
        assert_eq!(json["media_type"], 8);

        let sub = EventSubscription::subscribe(&[
            signaling_events::ACTIVE_SPEAKER_CHANGE,
            signaling_events::PARTICIPANT_JOIN,
        ]);
        let json = serde_json::to_value(&sub).unwrap();
        assert_eq!(json["msg_type"], 5);
        assert_eq!(json["events"].as_array().unwrap().len(), 2);
        assert_eq!(json["events"][0]["subscribe"], true);

        let ka = KeepAliveResponse::echo(1_714_000_000);
        let json = serde_json::to_value(&ka).unwrap();
        assert_eq!(json["msg_type"], 13);
        assert_eq!(json["timestamp"], 1_714_000_000_u64);
    }

    #[test]
    fn handshake_ack_decodes_server_urls() {
        let text = r#"{
            "msg_type": 2,
            "status_code": 0,
            "media_server": {
                "server_urls": {
                    "audio": "ws://media.example/audio",
                    "transcript": "ws://media.example/transcript"
                }
            }
        }"#;
        let frame = parse_server_frame(text).unwrap();
        let ServerFrame::SignalingHandshakeAck(ack) = frame else {
            panic!("expected handshake ack");
        };
        assert_eq!(ack.status_code, 0);
        let urls = ack.media_server.unwrap().server_urls;
        assert_eq!(urls.available_mask(), MediaMask::AUDIO | MediaMask::TRANSCRIPT);
        assert_eq!(urls.url_for(MediaKind::Audio), Some("ws://media.example/audio"));
        assert_eq!(urls.url_for(MediaKind::Chat), None);
    }

    #[test]
    fn transcript_payload_decodes_extended_fields() {
        let text = r#"{
            "msg_type": 17,
            "content": {
                "user_id": 16778240,
                "user_name": "U1",
                "data": "aGVsbG8=",
                "timestamp": 1714000000123,
                "start_time": 1714000000000,
                "end_time": 1714000000500,
                "language": "en",
                "attribute": "final"
            }
        }"#;
        let frame = parse_server_frame(text).unwrap();
        let ServerFrame::Media { kind, content } = frame else {
            panic!("expected media frame");
        };
        assert_eq!(kind, MediaKind::Transcript);
        assert_eq!(content.user_name.as_deref(), Some("U1"));
        assert_eq!(content.start_time, Some(1_714_000_000_000));
        assert_eq!(content.language.as_deref(), Some("en"));
    }

    #[test]
    fn meeting_ended_is_state_four_reason_six() {
        let frame = parse_server_frame(r#"{"msg_type":8,"state":4,"reason":6}"#).unwrap();
        let ServerFrame::StreamState(change) = frame else {
            panic!("expected stream state");
        };
        assert!(change.is_meeting_ended());

        let frame = parse_server_frame(r#"{"msg_type":8,"state":4,"reason":5}"#).unwrap();
        let ServerFrame::StreamState(change) = frame else {
            panic!("expected stream state");
        };
        assert!(!change.is_meeting_ended());
    }

    #[test]
    fn unknown_tag_is_not_an_error() {
        let frame = parse_server_frame(r#"{"msg_type":42}"#).unwrap();
        assert!(matches!(frame, ServerFrame::Unknown(42)));
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(matches!(
            parse_server_frame("not json"),
            Err(WireError::Json(_))
        ));
        assert!(matches!(
            parse_server_frame(r#"{"status_code":0}"#),
            Err(WireError::MissingMsgType)
        ));
        assert!(matches!(
            parse_server_frame(r#"{"msg_type":"two"}"#),
            Err(WireError::MissingMsgType)
        ));
    }
}
