//! Typed events emitted by stream sessions.
//!
//! Event payloads form a tagged variant; consumers subscribe by tag.  Every
//! event carries the stream envelope (meeting, stream, product) so
//! downstream consumers never need to look the session up again.

use crate::config::ProductKind;
use bytes::Bytes;
use rtms_protocol::error::RtmsError;
use rtms_protocol::media::MediaKind;

/// A decoded audio / video / screen-share frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFrame {
    pub user_id: Option<i64>,
    pub user_name: Option<String>,
    pub buffer: Bytes,
    /// Vendor capture timestamp, milliseconds.
    pub timestamp: u64,
}

/// One transcript fragment; `text` is already base64-decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptSegment {
    pub user_id: Option<i64>,
    pub user_name: Option<String>,
    pub text: String,
    pub timestamp: u64,
    pub start_time: Option<u64>,
    pub end_time: Option<u64>,
    pub language: Option<String>,
    pub attribute: Option<String>,
}

/// One in-meeting chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub user_id: Option<i64>,
    pub user_name: Option<String>,
    pub text: String,
    pub timestamp: u64,
}

/// The variant part of a stream event.
#[derive(Debug, Clone)]
pub enum StreamEventKind {
    Audio(MediaFrame),
    Video(MediaFrame),
    ShareScreen(MediaFrame),
    Transcript(TranscriptSegment),
    Chat(ChatMessage),
    /// Non-media signaling notification (active speaker, join, leave, …).
    Signaling {
        event_type: String,
        timestamp: Option<u64>,
        content: serde_json::Value,
    },
    StreamStateChanged {
        state: u8,
        reason: u8,
        timestamp: Option<u64>,
    },
    SessionStateChanged {
        state: u8,
        stop_reason: Option<u8>,
        timestamp: Option<u64>,
    },
    Error(RtmsError),
}

impl StreamEventKind {
    /// Wrap a decoded media frame under the right tag.
    pub fn media(kind: MediaKind, frame: MediaFrame) -> StreamEventKind {
        match kind {
            MediaKind::Audio => StreamEventKind::Audio(frame),
            MediaKind::Video => StreamEventKind::Video(frame),
            // Transcript and chat never reach this constructor; share is the
            // only remaining buffer-carrying kind.
            _ => StreamEventKind::ShareScreen(frame),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            StreamEventKind::Audio(_) => "audio",
            StreamEventKind::Video(_) => "video",
            StreamEventKind::ShareScreen(_) => "sharescreen",
            StreamEventKind::Transcript(_) => "transcript",
            StreamEventKind::Chat(_) => "chat",
            StreamEventKind::Signaling { .. } => "event",
            StreamEventKind::StreamStateChanged { .. } => "stream_state_changed",
            StreamEventKind::SessionStateChanged { .. } => "session_state_changed",
            StreamEventKind::Error(_) => "error",
        }
    }
}

/// An event from one stream session, with its envelope.
#[derive(Debug, Clone)]
pub struct StreamEvent {
    pub meeting_uuid: String,
    pub stream_id: String,
    pub product: ProductKind,
    pub kind: StreamEventKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_constructor_routes_by_kind() {
        let frame = MediaFrame {
            user_id: Some(1),
            user_name: Some("U1".to_owned()),
            buffer: Bytes::from_static(b"\x00\x01"),
            timestamp: 10,
        };
        assert_eq!(
            StreamEventKind::media(MediaKind::Audio, frame.clone()).tag(),
            "audio"
        );
        assert_eq!(
            StreamEventKind::media(MediaKind::Video, frame.clone()).tag(),
            "video"
        );
        assert_eq!(
            StreamEventKind::media(MediaKind::ShareScreen, frame).tag(),
            "sharescreen"
        );
    }
}
