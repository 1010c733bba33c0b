//! Frame builders for driving tests: the frames a vendor media server
//! would send, as raw JSON values.

use base64::Engine;
use rtms_protocol::media::MediaKind;
use serde_json::{Value, json};

fn b64(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

pub fn keep_alive(timestamp: u64) -> Value {
    json!({ "msg_type": 12, "timestamp": timestamp })
}

pub fn stream_state(state: u8, reason: u8, timestamp: u64) -> Value {
    json!({ "msg_type": 8, "state": state, "reason": reason, "timestamp": timestamp })
}

pub fn meeting_ended(timestamp: u64) -> Value {
    stream_state(4, 6, timestamp)
}

pub fn session_state(state: u8, stop_reason: u8, timestamp: u64) -> Value {
    json!({ "msg_type": 9, "state": state, "stop_reason": stop_reason, "timestamp": timestamp })
}

pub fn active_speaker(user_id: i64, user_name: &str, timestamp: u64) -> Value {
    json!({
        "msg_type": 6,
        "event_type": "ACTIVE_SPEAKER_CHANGE",
        "timestamp": timestamp,
        "content": { "user_id": user_id, "user_name": user_name },
    })
}

pub fn audio_frame(user_id: i64, user_name: &str, pcm: &[u8], timestamp: u64) -> Value {
    json!({
        "msg_type": MediaKind::Audio.payload_msg_type(),
        "content": {
            "user_id": user_id,
            "user_name": user_name,
            "data": b64(pcm),
            "timestamp": timestamp,
        },
    })
}

pub fn transcript_frame(
    user_id: i64,
    user_name: &str,
    text: &str,
    timestamp: u64,
) -> Value {
    json!({
        "msg_type": MediaKind::Transcript.payload_msg_type(),
        "content": {
            "user_id": user_id,
            "user_name": user_name,
            "data": b64(text.as_bytes()),
            "timestamp": timestamp,
            "start_time": timestamp,
            "end_time": timestamp + 400,
            "language": "en",
            "attribute": "final",
        },
    })
}

pub fn chat_frame(user_id: i64, user_name: &str, text: &str, timestamp: u64) -> Value {
    json!({
        "msg_type": MediaKind::Chat.payload_msg_type(),
        "content": {
            "user_id": user_id,
            "user_name": user_name,
            "data": b64(text.as_bytes()),
            "timestamp": timestamp,
        },
    })
}
