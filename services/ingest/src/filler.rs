//! Jitter/gap fillers for audio and video.
//!
//! Both variants share one decision core: a timestamp-ordered buffer and an
//! `expected` cursor advanced one frame per tick.  The audio variant paces
//! at the negotiated send rate and injects pre-rolled silence; the video
//! variant paces at `1000/fps` and injects a pre-loaded black frame.
//!
//! The core is pure (no timers) so the threshold rules are unit-testable;
//! [`run_filler`] wraps it in a `tokio::time::interval` and feeds emissions
//! into the session's event channel.

use crate::session::events::{MediaFrame, StreamEvent, StreamEventKind};
use bytes::Bytes;
use rtms_protocol::media::MediaKind;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Emit the real packet while `|diff| < EMIT_WINDOW_FRAMES · frame`.
const EMIT_WINDOW_FRAMES: i64 = 3;
/// Re-sync to the packet when it lags more than this many frames.
const RESYNC_LAG_FRAMES: i64 = 10;

/// One tick's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emit {
    /// A buffered packet whose timestamp matched the schedule.
    Real(MediaFrame),
    /// A generated frame covering a gap; `timestamp` is the slot it fills.
    Filler { timestamp: u64 },
}

/// Pure pacing core shared by the audio and video fillers.
pub struct FillerCore {
    kind: MediaKind,
    frame_ms: u64,
    /// Ordered by `timestamp`; insertion is binary-search with a fast-path
    /// append for in-order arrivals.
    buffer: Vec<MediaFrame>,
    expected: Option<u64>,
    dropped: u64,
}

impl FillerCore {
    pub fn new(kind: MediaKind, frame_ms: u64) -> Self {
        FillerCore {
            kind,
            frame_ms: frame_ms.max(1),
            buffer: Vec::new(),
            expected: None,
            dropped: 0,
        }
    }

    pub fn frame_ms(&self) -> u64 {
        self.frame_ms
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Number of small-backward packets dropped since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn insert(&mut self, frame: MediaFrame) {
        match self.buffer.last() {
            Some(last) if frame.timestamp < last.timestamp => {
                let at = self
                    .buffer
                    .partition_point(|f| f.timestamp <= frame.timestamp);
                self.buffer.insert(at, frame);
            }
            _ => self.buffer.push(frame),
        }
    }

    /// Advance one frame slot.
    ///
    /// Returns `None` only before the first packet has been seen; once the
    /// schedule is initialised, every tick produces exactly one emission.
    pub fn tick(&mut self) -> Option<Emit> {
        let expected = match self.expected {
            Some(e) => e,
            // First tick: the schedule starts at the first packet's own
            // timestamp, so a stream that begins late produces no leading
            // filler.
            None => self.buffer.first()?.timestamp,
        };

        let frame = i64::try_from(self.frame_ms).unwrap_or(i64::MAX);
        while let Some(head) = self.buffer.first() {
            let diff = timestamp_diff(head.timestamp, expected);
            if diff.abs() < EMIT_WINDOW_FRAMES * frame {
                let packet = self.buffer.remove(0);
                self.expected = Some(packet.timestamp + self.frame_ms);
                return Some(Emit::Real(packet));
            }
            if diff < -RESYNC_LAG_FRAMES * frame {
                // Large lag: jump the schedule to the packet.
                let packet = self.buffer.remove(0);
                self.expected = Some(packet.timestamp + self.frame_ms);
                return Some(Emit::Real(packet));
            }
            if diff < 0 {
                // Moderately late; drop and look at the next packet.
                self.buffer.remove(0);
                self.dropped += 1;
                continue;
            }
            // Packet is ahead of schedule; fill the slot and keep it buffered.
            self.expected = Some(expected + self.frame_ms);
            return Some(Emit::Filler { timestamp: expected });
        }

        // Nothing buffered: fill.
        self.expected = Some(expected + self.frame_ms);
        Some(Emit::Filler { timestamp: expected })
    }

    /// Termination: cover the tail up to `end_time` with fillers (emitting
    /// any still-buffered packets that fall on schedule along the way).
    pub fn drain_to(&mut self, end_time: u64) -> Vec<Emit> {
        let mut out = Vec::new();
        while self.expected.is_some_and(|e| e < end_time) {
            match self.tick() {
                Some(emit) => out.push(emit),
                None => break,
            }
        }
        out
    }
}

/// Wrapping-safe signed difference of millisecond timestamps.
fn timestamp_diff(a: u64, b: u64) -> i64 {
    i64::try_from(a as i128 - b as i128).unwrap_or(if a > b { i64::MAX } else { i64::MIN })
}

// ---------------------------------------------------------------------------
// Async driver
// ---------------------------------------------------------------------------

/// Input to a running filler task.
#[derive(Debug)]
pub enum FillerInput {
    Frame(MediaFrame),
    /// Stop; cover the gap up to `end_time` before exiting.
    Stop { end_time: u64 },
}

/// Envelope stamped onto every emission.
#[derive(Debug, Clone)]
pub struct FillerEnvelope {
    pub meeting_uuid: String,
    pub stream_id: String,
    pub product: crate::config::ProductKind,
    /// Payload substituted into generated frames (silence / black frame).
    pub filler_payload: Bytes,
}

/// Drive a filler until its input channel closes or a stop arrives.
///
/// Output is strictly monotone in timestamp; one frame per tick.
pub async fn run_filler(
    mut core: FillerCore,
    mut input: mpsc::Receiver<FillerInput>,
    events: mpsc::Sender<StreamEvent>,
    envelope: FillerEnvelope,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(core.frame_ms()));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Rate limits: filler lines at most 1/s, real-frame lines at most 1/5s.
    let mut last_filler_log: Option<Instant> = None;
    let mut last_real_log: Option<Instant> = None;
    let mut filler_count: u64 = 0;

    loop {
        tokio::select! {
            biased;
            msg = input.recv() => match msg {
                Some(FillerInput::Frame(frame)) => core.insert(frame),
                Some(FillerInput::Stop { end_time }) => {
                    for emit in core.drain_to(end_time) {
                        send_emit(&events, &envelope, &core, emit).await;
                    }
                    break;
                }
                None => break,
            },
            _ = ticker.tick() => {
                if let Some(emit) = core.tick() {
                    match &emit {
                        Emit::Filler { timestamp } => {
                            filler_count += 1;
                            if last_filler_log.is_none_or(|t| t.elapsed() >= Duration::from_secs(1)) {
                                debug!(
                                    stream_id = %envelope.stream_id,
                                    kind = ?core.kind(),
                                    timestamp,
                                    total = filler_count,
                                    "gap frame injected"
                                );
                                last_filler_log = Some(Instant::now());
                            }
                        }
                        Emit::Real(frame) => {
                            if last_real_log.is_none_or(|t| t.elapsed() >= Duration::from_secs(5)) {
                                debug!(
                                    stream_id = %envelope.stream_id,
                                    kind = ?core.kind(),
                                    timestamp = frame.timestamp,
                                    "paced media flowing"
                                );
                                last_real_log = Some(Instant::now());
                            }
                        }
                    }
                    send_emit(&events, &envelope, &core, emit).await;
                }
            }
        }
    }
}

async fn send_emit(
    events: &mpsc::Sender<StreamEvent>,
    envelope: &FillerEnvelope,
    core: &FillerCore,
    emit: Emit,
) {
    let frame = match emit {
        Emit::Real(frame) => frame,
        Emit::Filler { timestamp } => MediaFrame {
            user_id: None,
            user_name: None,
            buffer: envelope.filler_payload.clone(),
            timestamp,
        },
    };
    let event = StreamEvent {
        meeting_uuid: envelope.meeting_uuid.clone(),
        stream_id: envelope.stream_id.clone(),
        product: envelope.product,
        kind: StreamEventKind::media(core.kind(), frame),
    };
    if events.send(event).await.is_err() {
        warn!(stream_id = %envelope.stream_id, "event channel closed under filler");
    }
}

/// Pre-rolled PCM silence for one audio frame (16-bit mono).
pub fn silence_payload(sample_rate_hz: u32, frame_ms: u64) -> Bytes {
    let samples = u64::from(sample_rate_hz) * frame_ms / 1_000;
    Bytes::from(vec![0u8; usize::try_from(samples * 2).unwrap_or(0)])
}
