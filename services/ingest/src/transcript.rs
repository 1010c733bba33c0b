//! Per-meeting transcript buffer.
//!
//! Accumulates utterances and turns them into two signal families:
//! `summarize` triggers (periodic every 30 s, or after 10 s of per-speaker
//! silence) and `chunk` flushes (every 60 s, at ≥500 accumulated words, or
//! on destruction).
//!
//! The bookkeeping lives in [`TranscriptCore`], which is pure so the
//! trigger arithmetic is unit-testable; [`spawn_buffer`] wraps it in a task
//! owning the three timer families.  Dropping the handle destroys the
//! buffer, which flushes pending summaries and the final chunk.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

pub const SUMMARY_INTERVAL: Duration = Duration::from_secs(30);
pub const SPEAKER_IDLE: Duration = Duration::from_secs(10);
pub const CHUNK_INTERVAL: Duration = Duration::from_secs(60);
pub const CHUNK_WORD_THRESHOLD: usize = 500;

/// One normalised transcript fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    pub speaker_id: String,
    pub speaker_name: String,
    pub text: String,
    /// Milliseconds.
    pub timestamp: u64,
}

/// A buffered run of utterances flushed to the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentChunk {
    pub chunk_id: String,
    pub meeting_id: String,
    pub speaker_ids: Vec<String>,
    pub speaker_names: Vec<String>,
    pub text: String,
    pub start_time: u64,
    pub end_time: u64,
}

/// A per-speaker summarisation trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummarizeRequest {
    pub meeting_id: String,
    pub speaker_id: String,
    pub speaker_name: String,
    /// That speaker's unsummarised utterances joined with single spaces.
    /// Never empty.
    pub recent_text: String,
    /// Cumulative utterance count for the speaker; non-decreasing.
    pub segment_count: u64,
}

/// Output of a transcript buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferSignal {
    Chunk(ContentChunk),
    Summarize(SummarizeRequest),
}

// ---------------------------------------------------------------------------
// Pure core
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct SpeakerState {
    name: String,
    /// Index into `utterances` up to which this speaker has been summarised.
    mark: usize,
    /// Cumulative utterances seen for this speaker across the meeting.
    total_segments: u64,
}

/// Utterance bookkeeping for one meeting.
#[derive(Debug)]
pub struct TranscriptCore {
    meeting_uuid: String,
    utterances: Vec<Utterance>,
    word_count: usize,
    chunk_seq: u64,
    speakers: HashMap<String, SpeakerState>,
}

impl TranscriptCore {
    pub fn new(meeting_uuid: impl Into<String>) -> Self {
        TranscriptCore {
            meeting_uuid: meeting_uuid.into(),
            utterances: Vec::new(),
            word_count: 0,
            chunk_seq: 0,
            speakers: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.utterances.is_empty()
    }

    /// Append in arrival order.  Returns true when the accumulated word
    /// count crossed the chunk threshold.
    pub fn append(&mut self, utterance: Utterance) -> bool {
        self.word_count += utterance.text.split_whitespace().count();
        let speaker = self
            .speakers
            .entry(utterance.speaker_id.clone())
            .or_insert_with(|| SpeakerState {
                name: utterance.speaker_name.clone(),
                mark: self.utterances.len(),
                total_segments: 0,
            });
        speaker.name = utterance.speaker_name.clone();
        speaker.total_segments += 1;
        self.utterances.push(utterance);
        self.word_count >= CHUNK_WORD_THRESHOLD
    }

    /// Summaries for every speaker with unsummarised utterances; advances
    /// each emitted speaker's mark to the end of the buffer.
    pub fn summaries_due(&mut self) -> Vec<SummarizeRequest> {
        let ids: Vec<String> = self.speakers.keys().cloned().collect();
        let mut due: Vec<SummarizeRequest> = ids
            .into_iter()
            .filter_map(|id| self.summary_for(&id))
            .collect();
        // HashMap iteration order is arbitrary; emit deterministically.
        due.sort_by(|a, b| a.speaker_id.cmp(&b.speaker_id));
        due
    }

    /// Summary for one speaker, or `None` if nothing is pending (no
    /// `summarize` ever fires with empty `recent_text`).
    pub fn summary_for(&mut self, speaker_id: &str) -> Option<SummarizeRequest> {
        let speaker = self.speakers.get_mut(speaker_id)?;
        let tail: Vec<&str> = self.utterances[speaker.mark.min(self.utterances.len())..]
            .iter()
            .filter(|u| u.speaker_id == speaker_id)
            .map(|u| u.text.as_str())
            .collect();
        if tail.is_empty() {
            return None;
        }
        speaker.mark = self.utterances.len();
        Some(SummarizeRequest {
            meeting_id: self.meeting_uuid.clone(),
            speaker_id: speaker_id.to_owned(),
            speaker_name: speaker.name.clone(),
            recent_text: tail.join(" "),
            segment_count: speaker.total_segments,
        })
    }

    /// Whether `speaker_id` has utterances newer than its mark.
    pub fn has_pending(&self, speaker_id: &str) -> bool {
        self.speakers.get(speaker_id).is_some_and(|s| {
            self.utterances[s.mark.min(self.utterances.len())..]
                .iter()
                .any(|u| u.speaker_id == speaker_id)
        })
    }

    /// Flush everything buffered into one chunk; `None` when empty.
    ///
    /// Afterwards the buffer is empty: word counter reset, per-speaker
    /// marks cleared.
    pub fn flush_chunk(&mut self) -> Option<ContentChunk> {
        if self.utterances.is_empty() {
            return None;
        }
        self.chunk_seq += 1;

        let mut speaker_ids: Vec<String> = Vec::new();
        let mut speaker_names: Vec<String> = Vec::new();
        for u in &self.utterances {
            if !speaker_ids.contains(&u.speaker_id) {
                speaker_ids.push(u.speaker_id.clone());
                speaker_names.push(u.speaker_name.clone());
            }
        }
        let text = self
            .utterances
            .iter()
            .map(|u| format!("{}: {}", u.speaker_name, u.text))
            .collect::<Vec<_>>()
            .join("\n");
        let chunk = ContentChunk {
            chunk_id: format!("{}-chunk-{}", self.meeting_uuid, self.chunk_seq),
            meeting_id: self.meeting_uuid.clone(),
            speaker_ids,
            speaker_names,
            text,
            start_time: self.utterances.first().map(|u| u.timestamp).unwrap_or(0),
            end_time: self.utterances.last().map(|u| u.timestamp).unwrap_or(0),
        };

        self.utterances.clear();
        self.word_count = 0;
        for speaker in self.speakers.values_mut() {
            speaker.mark = 0;
        }
        Some(chunk)
    }
}

// ---------------------------------------------------------------------------
// Async driver
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum BufferInput {
    Utterance(Utterance),
    Destroy,
}

/// Handle to a running transcript buffer task.
#[derive(Debug, Clone)]
pub struct TranscriptBufferHandle {
    tx: mpsc::Sender<BufferInput>,
}

impl TranscriptBufferHandle {
    pub async fn append(&self, utterance: Utterance) {
        if self.tx.send(BufferInput::Utterance(utterance)).await.is_err() {
            warn!("transcript buffer task is gone; utterance dropped");
        }
    }

    /// Flush pending summaries and the final chunk, then stop the task.
    pub async fn destroy(&self) {
        let _ = self.tx.send(BufferInput::Destroy).await;
    }
}

/// Spawn the buffer task for one meeting.
pub fn spawn_buffer(
    meeting_uuid: impl Into<String>,
    signals: mpsc::Sender<BufferSignal>,
) -> TranscriptBufferHandle {
    let (tx, rx) = mpsc::channel(256);
    let core = TranscriptCore::new(meeting_uuid);
    tokio::spawn(run_buffer(core, rx, signals));
    TranscriptBufferHandle { tx }
}

async fn run_buffer(
    mut core: TranscriptCore,
    mut input: mpsc::Receiver<BufferInput>,
    signals: mpsc::Sender<BufferSignal>,
) {
    let mut summary_ticks = tokio::time::interval(SUMMARY_INTERVAL);
    summary_ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut chunk_ticks = tokio::time::interval(CHUNK_INTERVAL);
    chunk_ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Swallow the immediate first tick of each interval.
    summary_ticks.tick().await;
    chunk_ticks.tick().await;

    let mut last_heard: HashMap<String, Instant> = HashMap::new();

    loop {
        // The speaker-idle timer is the earliest deadline among speakers
        // that still have unsummarised utterances.
        let idle_deadline = last_heard
            .iter()
            .filter(|(id, _)| core.has_pending(id))
            .map(|(_, at)| *at + SPEAKER_IDLE)
            .min();

        tokio::select! {
            msg = input.recv() => match msg {
                Some(BufferInput::Utterance(utterance)) => {
                    last_heard.insert(utterance.speaker_id.clone(), Instant::now());
                    if core.append(utterance) {
                        flush_chunk(&mut core, &signals).await;
                        chunk_ticks.reset();
                    }
                }
                Some(BufferInput::Destroy) | None => break,
            },
            _ = summary_ticks.tick() => {
                for request in core.summaries_due() {
                    send_signal(&signals, BufferSignal::Summarize(request)).await;
                }
            }
            _ = chunk_ticks.tick() => {
                flush_chunk(&mut core, &signals).await;
            }
            () = async {
                match idle_deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            } => {
                let now = Instant::now();
                let idle: Vec<String> = last_heard
                    .iter()
                    .filter(|(_, at)| now.duration_since(**at) >= SPEAKER_IDLE)
                    .map(|(id, _)| id.clone())
                    .collect();
                for speaker_id in idle {
                    if let Some(request) = core.summary_for(&speaker_id) {
                        debug!(speaker_id = %request.speaker_id, "speaker went quiet; summarising");
                        send_signal(&signals, BufferSignal::Summarize(request)).await;
                    }
                    last_heard.remove(&speaker_id);
                }
            }
        }
    }

    // Destruction: pending summaries first (they reference utterances the
    // final chunk is about to clear), then the final chunk.
    for request in core.summaries_due() {
        send_signal(&signals, BufferSignal::Summarize(request)).await;
    }
    flush_chunk(&mut core, &signals).await;
}

async fn flush_chunk(core: &mut TranscriptCore, signals: &mpsc::Sender<BufferSignal>) {
    if let Some(chunk) = core.flush_chunk() {
        send_signal(signals, BufferSignal::Chunk(chunk)).await;
    }
}

async fn send_signal(signals: &mpsc::Sender<BufferSignal>, signal: BufferSignal) {
    if signals.send(signal).await.is_err() {
        warn!("buffer signal consumer is gone");
    }
}
