//! Media sub-socket tasks and their supervisor.
//!
//! Each subscribed media kind gets its own socket: dial, `msg_type 3`
//! handshake, then decode payload frames until the socket drops or the
//! session stops.  The supervisor tracks one generation number per kind so
//! notices from a replaced socket instance are ignored, and debounces
//! per-kind reconnects (never more than one pending timer per kind).

use super::events::{ChatMessage, MediaFrame, StreamEventKind, TranscriptSegment};
use super::{
    RECONNECT_DEBOUNCE, SessionParams, SocketState, StreamMetadata, emit_event, keep_alive_rtt,
};
use crate::filler::{self, FillerCore, FillerEnvelope, FillerInput};
use base64::Engine;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use rtms_protocol::error::RtmsError;
use rtms_protocol::media::MediaKind;
use rtms_protocol::wire::{KeepAliveResponse, MediaHandshake, ServerFrame, ServerUrls};
use rtms_protocol::{MediaContent, parse_server_frame};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

/// What a media task reports back to the signaling loop.
#[derive(Debug)]
pub(super) enum MediaNotice {
    Ready {
        kind: MediaKind,
        generation: u64,
    },
    Closed {
        kind: MediaKind,
        generation: u64,
    },
    ReconnectDue {
        kind: MediaKind,
        generation: u64,
    },
    Fatal {
        kind: MediaKind,
        generation: u64,
        error: RtmsError,
    },
}

impl MediaNotice {
    pub(super) fn key(&self) -> (MediaKind, u64) {
        match *self {
            MediaNotice::Ready { kind, generation }
            | MediaNotice::Closed { kind, generation }
            | MediaNotice::ReconnectDue { kind, generation }
            | MediaNotice::Fatal {
                kind, generation, ..
            } => (kind, generation),
        }
    }
}

/// Owns the media tasks for one signaling connection.
pub(super) struct MediaSupervisor {
    params: SessionParams,
    metadata: Arc<RwLock<StreamMetadata>>,
    signature: String,
    notices: mpsc::Sender<MediaNotice>,
    stop: watch::Receiver<bool>,
    next_generation: u64,
    current: HashMap<MediaKind, u64>,
    urls: HashMap<MediaKind, String>,
    tasks: Vec<JoinHandle<()>>,
    pending_reconnect: HashSet<MediaKind>,
}

impl MediaSupervisor {
    pub(super) fn new(
        params: SessionParams,
        metadata: Arc<RwLock<StreamMetadata>>,
        signature: String,
        notices: mpsc::Sender<MediaNotice>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        MediaSupervisor {
            params,
            metadata,
            signature,
            notices,
            stop,
            next_generation: 0,
            current: HashMap::new(),
            urls: HashMap::new(),
            tasks: Vec::new(),
            pending_reconnect: HashSet::new(),
        }
    }

    /// Whether a notice belongs to the live socket instance for its kind.
    pub(super) fn is_current(&self, kind: MediaKind, generation: u64) -> bool {
        self.current.get(&kind) == Some(&generation)
    }

    /// Open one sub-socket per bit of the effective mask.
    pub(super) async fn open_all(
        &mut self,
        mask: rtms_protocol::media::MediaMask,
        urls: &ServerUrls,
    ) {
        for kind in MediaKind::in_mask(mask) {
            // in_mask only yields kinds with bits in `mask`, and the mask
            // came from available URLs, so this lookup always succeeds.
            if let Some(url) = urls.url_for(kind) {
                self.urls.insert(kind, url.to_owned());
                self.spawn(kind).await;
            }
        }
    }

    /// Debounced single-socket reconnect; at most one pending per kind.
    pub(super) fn schedule_reconnect(&mut self, kind: MediaKind) {
        if !self.pending_reconnect.insert(kind) {
            return;
        }
        let Some(&generation) = self.current.get(&kind) else {
            return;
        };
        debug!(stream_id = %self.params.stream_id, ?kind, "media reconnect scheduled");
        let notices = self.notices.clone();
        self.tasks.push(tokio::spawn(async move {
            tokio::time::sleep(RECONNECT_DEBOUNCE).await;
            let _ = notices
                .send(MediaNotice::ReconnectDue { kind, generation })
                .await;
        }));
    }

    pub(super) async fn respawn(&mut self, kind: MediaKind) {
        self.pending_reconnect.remove(&kind);
        self.spawn(kind).await;
    }

    async fn spawn(&mut self, kind: MediaKind) {
        let Some(url) = self.urls.get(&kind).cloned() else {
            return;
        };
        self.next_generation += 1;
        let generation = self.next_generation;
        self.current.insert(kind, generation);
        self.metadata
            .write()
            .await
            .media_states
            .insert(kind, SocketState::Connecting);

        let ctx = MediaTaskCtx {
            kind,
            url,
            generation,
            params: self.params.clone(),
            metadata: self.metadata.clone(),
            signature: self.signature.clone(),
            notices: self.notices.clone(),
            stop: self.stop.clone(),
        };
        self.tasks.push(tokio::spawn(run_media_socket(ctx)));
    }

    /// Join every spawned task; the stop watch has already been flipped.
    pub(super) async fn shutdown(mut self) {
        for mut task in self.tasks.drain(..) {
            if tokio::time::timeout(std::time::Duration::from_secs(1), &mut task)
                .await
                .is_err()
            {
                task.abort();
            }
        }
    }
}

struct MediaTaskCtx {
    kind: MediaKind,
    url: String,
    generation: u64,
    params: SessionParams,
    metadata: Arc<RwLock<StreamMetadata>>,
    signature: String,
    notices: mpsc::Sender<MediaNotice>,
    stop: watch::Receiver<bool>,
}

async fn run_media_socket(mut ctx: MediaTaskCtx) {
    let connect = connect_async(&ctx.url);
    let ws = tokio::select! {
        _ = ctx.stop.changed() => return,
        result = connect => match result {
            Ok((ws, _)) => ws,
            Err(e) => {
                warn!(stream_id = %ctx.params.stream_id, kind = ?ctx.kind, error = %e, "media connect failed");
                notify(&ctx, MediaNotice::Closed { kind: ctx.kind, generation: ctx.generation }).await;
                return;
            }
        }
    };
    let mut ws = ws;

    let media_params = ctx.metadata.read().await.media_params;
    let handshake = MediaHandshake::new(
        &ctx.params.meeting_uuid,
        &ctx.params.stream_id,
        ctx.signature.clone(),
        ctx.kind,
        media_params,
    );
    if super::signaling::send_json(&mut ws, &handshake).await.is_err() {
        notify(
            &ctx,
            MediaNotice::Closed {
                kind: ctx.kind,
                generation: ctx.generation,
            },
        )
        .await;
        return;
    }
    set_media_state(&ctx, SocketState::Authenticated).await;

    let mut filler: Option<mpsc::Sender<FillerInput>> = None;
    let mut filler_task: Option<JoinHandle<()>> = None;
    let mut last_media_ts: u64 = 0;
    let mut closed_notice = true;

    loop {
        tokio::select! {
            _ = ctx.stop.changed() => {
                closed_notice = false;
                break;
            }
            msg = ws.next() => match msg {
                None | Some(Ok(Message::Close(_))) => {
                    info!(stream_id = %ctx.params.stream_id, kind = ?ctx.kind, "media socket closed");
                    break;
                }
                Some(Err(e)) => {
                    warn!(stream_id = %ctx.params.stream_id, kind = ?ctx.kind, error = %e, "media socket error");
                    break;
                }
                Some(Ok(Message::Text(text))) => {
                    let frame = match parse_server_frame(&text) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(stream_id = %ctx.params.stream_id, kind = ?ctx.kind, error = %e, "malformed media frame dropped");
                            continue;
                        }
                    };
                    match frame {
                        ServerFrame::MediaHandshakeAck(ack) => {
                            if ack.status_code != 0 {
                                let error = RtmsError::from_status(ack.status_code);
                                warn!(
                                    stream_id = %ctx.params.stream_id,
                                    kind = ?ctx.kind,
                                    status = ack.status_code,
                                    "media handshake rejected"
                                );
                                notify(&ctx, MediaNotice::Fatal {
                                    kind: ctx.kind,
                                    generation: ctx.generation,
                                    error,
                                }).await;
                                closed_notice = false;
                                break;
                            }
                            let effective_params = {
                                let mut meta = ctx.metadata.write().await;
                                if let Some(negotiated) = ack.media_params {
                                    if !meta.params_negotiated {
                                        meta.media_params = negotiated;
                                        meta.params_negotiated = true;
                                    }
                                }
                                meta.media_states.insert(ctx.kind, SocketState::Streaming);
                                meta.media_params
                            };
                            if ctx.params.fillers_enabled && filler.is_none() {
                                if let Some(frame_ms) = effective_params.frame_duration_ms(ctx.kind) {
                                    let (tx, task) = spawn_filler(&ctx, frame_ms, effective_params);
                                    filler = Some(tx);
                                    filler_task = Some(task);
                                }
                            }
                            notify(&ctx, MediaNotice::Ready {
                                kind: ctx.kind,
                                generation: ctx.generation,
                            }).await;
                        }
                        ServerFrame::KeepAlive(ka) => {
                            {
                                let mut meta = ctx.metadata.write().await;
                                meta.last_keep_alive = Some(ka.timestamp);
                                meta.rtt_ms = Some(keep_alive_rtt(ka.timestamp));
                            }
                            if super::signaling::send_json(&mut ws, &KeepAliveResponse::echo(ka.timestamp)).await.is_err() {
                                break;
                            }
                        }
                        ServerFrame::Media { kind, content } => {
                            if let Some(ts) = handle_media(&ctx, kind, content, filler.as_ref()).await {
                                last_media_ts = ts;
                            }
                        }
                        other => {
                            debug!(stream_id = %ctx.params.stream_id, kind = ?ctx.kind, ?other, "unexpected frame on media socket");
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = ws.send(Message::Pong(data)).await;
                }
                Some(Ok(_)) => {}
            }
        }
    }

    // Let the filler cover the tail before it ceases.
    if let Some(tx) = filler {
        let _ = tx
            .send(FillerInput::Stop {
                end_time: last_media_ts,
            })
            .await;
    }
    if let Some(task) = filler_task {
        let _ = task.await;
    }
    set_media_state(&ctx, SocketState::Closed).await;
    if closed_notice {
        notify(
            &ctx,
            MediaNotice::Closed {
                kind: ctx.kind,
                generation: ctx.generation,
            },
        )
        .await;
    }
}

fn spawn_filler(
    ctx: &MediaTaskCtx,
    frame_ms: u64,
    params: rtms_protocol::media::MediaParams,
) -> (mpsc::Sender<FillerInput>, JoinHandle<()>) {
    let payload = match ctx.kind {
        MediaKind::Audio => filler::silence_payload(params.audio_sample_rate.hz(), frame_ms),
        // TODO: provision a real pre-encoded black I-frame asset; an empty
        // payload keeps the cadence but decodes to nothing.
        _ => Bytes::new(),
    };
    let core = FillerCore::new(ctx.kind, frame_ms);
    let (tx, rx) = mpsc::channel(256);
    let envelope = FillerEnvelope {
        meeting_uuid: ctx.params.meeting_uuid.clone(),
        stream_id: ctx.params.stream_id.clone(),
        product: ctx.params.product,
        filler_payload: payload,
    };
    let events = ctx.params.events.clone();
    let task = tokio::spawn(filler::run_filler(core, rx, events, envelope));
    (tx, task)
}

/// Decode one payload frame and route it out.  Returns the packet
/// timestamp when one was recorded.
async fn handle_media(
    ctx: &MediaTaskCtx,
    kind: MediaKind,
    content: MediaContent,
    filler: Option<&mpsc::Sender<FillerInput>>,
) -> Option<u64> {
    match kind {
        MediaKind::Transcript => {
            let text = decode_text(ctx, &content)?;
            let timestamp = content
                .timestamp
                .or(content.start_time)
                .unwrap_or_default();
            ctx.metadata.write().await.record_packet(timestamp);
            emit_event(
                &ctx.params,
                StreamEventKind::Transcript(TranscriptSegment {
                    user_id: content.user_id,
                    user_name: content.user_name,
                    text,
                    timestamp,
                    start_time: content.start_time,
                    end_time: content.end_time,
                    language: content.language,
                    attribute: content.attribute,
                }),
            )
            .await;
            Some(timestamp)
        }
        MediaKind::Chat => {
            let text = decode_text(ctx, &content)?;
            let timestamp = content.timestamp.unwrap_or_default();
            ctx.metadata.write().await.record_packet(timestamp);
            emit_event(
                &ctx.params,
                StreamEventKind::Chat(ChatMessage {
                    user_id: content.user_id,
                    user_name: content.user_name,
                    text,
                    timestamp,
                }),
            )
            .await;
            Some(timestamp)
        }
        MediaKind::Audio | MediaKind::Video | MediaKind::ShareScreen => {
            let buffer = decode_buffer(ctx, &content)?;
            let Some(timestamp) = content.timestamp else {
                warn!(stream_id = %ctx.params.stream_id, ?kind, "media frame without timestamp dropped");
                return None;
            };
            ctx.metadata.write().await.record_packet(timestamp);
            let frame = MediaFrame {
                user_id: content.user_id,
                user_name: content.user_name,
                buffer,
                timestamp,
            };
            match filler {
                // The filler paces audio and video; share always passes
                // through directly.
                Some(tx) if kind != MediaKind::ShareScreen => {
                    let _ = tx.send(FillerInput::Frame(frame)).await;
                }
                _ => {
                    emit_event(&ctx.params, StreamEventKind::media(kind, frame)).await;
                }
            }
            Some(timestamp)
        }
    }
}

fn decode_buffer(ctx: &MediaTaskCtx, content: &MediaContent) -> Option<Bytes> {
    let data = content.data.as_deref()?;
    match base64::engine::general_purpose::STANDARD.decode(data) {
        Ok(bytes) => Some(Bytes::from(bytes)),
        Err(e) => {
            warn!(stream_id = %ctx.params.stream_id, kind = ?ctx.kind, error = %e, "base64 decode failed; frame dropped");
            None
        }
    }
}

fn decode_text(ctx: &MediaTaskCtx, content: &MediaContent) -> Option<String> {
    let bytes = decode_buffer(ctx, content)?;
    match String::from_utf8(bytes.to_vec()) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(stream_id = %ctx.params.stream_id, kind = ?ctx.kind, error = %e, "non-UTF-8 text payload dropped");
            None
        }
    }
}

async fn set_media_state(ctx: &MediaTaskCtx, state: SocketState) {
    ctx.metadata
        .write()
        .await
        .media_states
        .insert(ctx.kind, state);
}

async fn notify(ctx: &MediaTaskCtx, notice: MediaNotice) {
    if ctx.notices.send(notice).await.is_err() {
        debug!(stream_id = %ctx.params.stream_id, kind = ?ctx.kind, "signaling loop gone; notice dropped");
    }
}
