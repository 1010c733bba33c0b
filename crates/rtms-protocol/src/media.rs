//! Media subscription mask and negotiated media parameters.
//!
//! Subscription is a bit mask over the five media kinds.  The configured
//! mask may also carry the `ALL_MEDIA` sentinel (32), meaning "everything
//! the server offers"; it is resolved against the server's advertised URLs
//! at handshake time via [`effective_mask`].

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Set of media kinds a stream is (or may be) subscribed to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct MediaMask: u8 {
        const AUDIO = 1;
        const VIDEO = 2;
        const SHARE = 4;
        const TRANSCRIPT = 8;
        const CHAT = 16;
    }
}

/// Request sentinel: subscribe to everything the server offers.
///
/// Not a real media bit — it never appears in an effective mask.
pub const ALL_MEDIA: u8 = 32;

/// Resolve the configured subscription against the server-advertised set.
///
/// `requested` is the raw config value (may carry [`ALL_MEDIA`]);
/// `available` is the OR of kinds the handshake response supplied a URL for.
pub fn effective_mask(requested: u8, available: MediaMask) -> MediaMask {
    if requested & ALL_MEDIA != 0 {
        available
    } else {
        MediaMask::from_bits_truncate(requested) & available
    }
}

/// One concrete media kind; maps 1:1 to a media sub-socket and to the
/// payload `msg_type` range 14–18.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
    #[serde(rename = "sharescreen")]
    ShareScreen,
    Transcript,
    Chat,
}

impl MediaKind {
    pub const ALL: [MediaKind; 5] = [
        MediaKind::Audio,
        MediaKind::Video,
        MediaKind::ShareScreen,
        MediaKind::Transcript,
        MediaKind::Chat,
    ];

    /// The mask bit for this kind.
    pub fn flag(self) -> MediaMask {
        match self {
            MediaKind::Audio => MediaMask::AUDIO,
            MediaKind::Video => MediaMask::VIDEO,
            MediaKind::ShareScreen => MediaMask::SHARE,
            MediaKind::Transcript => MediaMask::TRANSCRIPT,
            MediaKind::Chat => MediaMask::CHAT,
        }
    }

    /// The payload `msg_type` carrying this kind.
    pub fn payload_msg_type(self) -> u8 {
        match self {
            MediaKind::Audio => crate::wire::msg_type::MEDIA_AUDIO,
            MediaKind::Video => crate::wire::msg_type::MEDIA_VIDEO,
            MediaKind::ShareScreen => crate::wire::msg_type::MEDIA_SHARE,
            MediaKind::Transcript => crate::wire::msg_type::MEDIA_TRANSCRIPT,
            MediaKind::Chat => crate::wire::msg_type::MEDIA_CHAT,
        }
    }

    /// The `server_urls` key for this kind.
    pub fn url_key(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
            MediaKind::ShareScreen => "sharescreen",
            MediaKind::Transcript => "transcript",
            MediaKind::Chat => "chat",
        }
    }

    /// Kinds present in a mask, in fixed bit order.
    pub fn in_mask(mask: MediaMask) -> impl Iterator<Item = MediaKind> {
        Self::ALL.into_iter().filter(move |k| mask.contains(k.flag()))
    }
}

/// Audio sample rate as negotiated on the wire (enum code, not Hz).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum AudioSampleRate {
    Sr8k,
    Sr16k,
    Sr32k,
    Sr48k,
}

impl AudioSampleRate {
    pub fn hz(self) -> u32 {
        match self {
            AudioSampleRate::Sr8k => 8_000,
            AudioSampleRate::Sr16k => 16_000,
            AudioSampleRate::Sr32k => 32_000,
            AudioSampleRate::Sr48k => 48_000,
        }
    }
}

impl From<AudioSampleRate> for u8 {
    fn from(value: AudioSampleRate) -> Self {
        match value {
            AudioSampleRate::Sr8k => 0,
            AudioSampleRate::Sr16k => 1,
            AudioSampleRate::Sr32k => 2,
            AudioSampleRate::Sr48k => 3,
        }
    }
}

impl TryFrom<u8> for AudioSampleRate {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AudioSampleRate::Sr8k),
            1 => Ok(AudioSampleRate::Sr16k),
            2 => Ok(AudioSampleRate::Sr32k),
            3 => Ok(AudioSampleRate::Sr48k),
            other => Err(format!("unknown sample rate code {other}")),
        }
    }
}

/// Negotiated per-stream media parameters.
///
/// Fixed at the first handshake response and immutable thereafter; the
/// fillers derive their pacing from these values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaParams {
    #[serde(default = "default_sample_rate")]
    pub audio_sample_rate: AudioSampleRate,
    /// Milliseconds of audio per frame.
    #[serde(default = "default_send_rate_ms")]
    pub audio_send_rate_ms: u32,
    /// Video frames per second.
    #[serde(default = "default_video_fps")]
    pub video_fps: u32,
}

fn default_sample_rate() -> AudioSampleRate {
    AudioSampleRate::Sr16k
}

fn default_send_rate_ms() -> u32 {
    20
}

fn default_video_fps() -> u32 {
    25
}

impl Default for MediaParams {
    fn default() -> Self {
        MediaParams {
            audio_sample_rate: default_sample_rate(),
            audio_send_rate_ms: default_send_rate_ms(),
            video_fps: default_video_fps(),
        }
    }
}

impl MediaParams {
    /// Frame duration in milliseconds for a paced media kind.
    ///
    /// Returns `None` for kinds that are never paced.
    pub fn frame_duration_ms(&self, kind: MediaKind) -> Option<u64> {
        match kind {
            MediaKind::Audio => Some(u64::from(self.audio_send_rate_ms.max(1))),
            MediaKind::Video => Some(1_000 / u64::from(self.video_fps.max(1))),
            _ => None,
        }
    }
}
