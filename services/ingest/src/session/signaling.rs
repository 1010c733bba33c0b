//! Signaling socket lifecycle for one connection attempt.
//!
//! Dial, authenticate with `msg_type 1`, then run the read loop: dispatch
//! handshake responses, signaling events, state changes and keep-alives,
//! and supervise the media sub-sockets through their notice channel.  The
//! caller (the session task) owns reconnect policy; this function only
//! reports *why* the connection ended.

use super::events::StreamEventKind;
use super::media::{MediaNotice, MediaSupervisor};
use super::{
    SessionCommand, SessionParams, SignalingExit, SocketState, StreamMetadata, emit_event,
    keep_alive_rtt,
};
use futures_util::{SinkExt, StreamExt};
use rtms_protocol::error::{ErrorCategory, RtmsError};
use rtms_protocol::media::effective_mask;
use rtms_protocol::wire::{
    self, EventSubscription, KeepAliveResponse, MediaReady, ServerFrame, SignalingHandshake,
};
use rtms_protocol::{parse_server_frame, sign_handshake};
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

pub(crate) async fn run_signaling(
    params: &SessionParams,
    metadata: &Arc<RwLock<StreamMetadata>>,
    control_rx: &mut mpsc::Receiver<SessionCommand>,
) -> SignalingExit {
    metadata.write().await.state = SocketState::Connecting;

    let (mut ws, _response) = match connect_async(&params.signaling_url).await {
        Ok(ok) => ok,
        Err(e) => {
            warn!(stream_id = %params.stream_id, error = %e, "signaling connect failed");
            emit_event(
                params,
                StreamEventKind::Error(RtmsError::local(
                    ErrorCategory::Connection,
                    format!("signaling connect: {e}"),
                )),
            )
            .await;
            return SignalingExit::Retry;
        }
    };

    // Handshake: signature over "<clientId>,<meetingUuid>,<streamId>".
    let signature = sign_handshake(
        &params.credentials.client_id,
        &params.meeting_uuid,
        &params.stream_id,
        &params.credentials.client_secret,
    );
    let handshake =
        SignalingHandshake::new(&params.meeting_uuid, &params.stream_id, signature.clone());
    if let Err(e) = send_json(&mut ws, &handshake).await {
        warn!(stream_id = %params.stream_id, error = %e, "signaling handshake send failed");
        return SignalingExit::Retry;
    }
    metadata.write().await.state = SocketState::Authenticated;

    // Media sub-sockets report through the notice channel; the stop watch
    // tears them down (including ones still connecting).
    let (notice_tx, mut notice_rx) = mpsc::channel::<MediaNotice>(32);
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut supervisor = MediaSupervisor::new(
        params.clone(),
        metadata.clone(),
        signature,
        notice_tx,
        stop_rx,
    );
    let mut handshake_done = false;

    let exit = loop {
        tokio::select! {
            biased;
            cmd = control_rx.recv() => {
                if matches!(cmd, Some(SessionCommand::Stop) | None) {
                    info!(stream_id = %params.stream_id, "stop requested; closing signaling");
                    let _ = ws.close(None).await;
                    break SignalingExit::Stopped;
                }
            }
            Some(notice) = notice_rx.recv() => {
                let (kind, generation) = notice.key();
                if !supervisor.is_current(kind, generation) {
                    // A replaced socket instance speaking up; ignore it.
                    continue;
                }
                match notice {
                    MediaNotice::Ready { .. } => {
                        debug!(stream_id = %params.stream_id, ?kind, "media sub-socket ready");
                        let ready = MediaReady::new(&params.stream_id, kind);
                        if let Err(e) = send_json(&mut ws, &ready).await {
                            warn!(stream_id = %params.stream_id, error = %e, "media-ready notify failed");
                            break SignalingExit::Retry;
                        }
                    }
                    MediaNotice::Closed { .. } => {
                        if handshake_done {
                            // Signaling is healthy: bounce only this sub-socket.
                            supervisor.schedule_reconnect(kind);
                        } else {
                            warn!(stream_id = %params.stream_id, ?kind, "media socket lost before ready; tearing session down");
                            break SignalingExit::Retry;
                        }
                    }
                    MediaNotice::ReconnectDue { .. } => {
                        if handshake_done {
                            supervisor.respawn(kind).await;
                        }
                    }
                    MediaNotice::Fatal { error, .. } => {
                        let retryable = error.retryable();
                        emit_event(params, StreamEventKind::Error(error)).await;
                        if retryable {
                            supervisor.schedule_reconnect(kind);
                        } else {
                            break SignalingExit::Fatal;
                        }
                    }
                }
            }
            msg = ws.next() => match msg {
                None => {
                    info!(stream_id = %params.stream_id, "signaling closed by server");
                    break SignalingExit::Retry;
                }
                Some(Err(e)) => {
                    warn!(stream_id = %params.stream_id, error = %e, "signaling socket error");
                    emit_event(
                        params,
                        StreamEventKind::Error(RtmsError::local(
                            ErrorCategory::Connection,
                            e.to_string(),
                        )),
                    )
                    .await;
                    break SignalingExit::Retry;
                }
                Some(Ok(Message::Text(text))) => {
                    let frame = match parse_server_frame(&text) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(stream_id = %params.stream_id, error = %e, "malformed signaling frame dropped");
                            continue;
                        }
                    };
                    match frame {
                        ServerFrame::SignalingHandshakeAck(ack) if !handshake_done => {
                            if ack.status_code != 0 {
                                let error = RtmsError::from_status(ack.status_code);
                                warn!(
                                    stream_id = %params.stream_id,
                                    status = ack.status_code,
                                    category = %error.category,
                                    reason = ack.reason.as_deref().unwrap_or(""),
                                    "signaling handshake rejected"
                                );
                                let retryable = error.retryable();
                                emit_event(params, StreamEventKind::Error(error)).await;
                                let _ = ws.close(None).await;
                                break if retryable { SignalingExit::Retry } else { SignalingExit::Fatal };
                            }
                            handshake_done = true;

                            let urls = ack
                                .media_server
                                .map(|m| m.server_urls)
                                .unwrap_or_default();
                            let effective = effective_mask(params.subscribe_mask, urls.available_mask());
                            {
                                let mut meta = metadata.write().await;
                                meta.state = SocketState::Streaming;
                                meta.media_mask = effective;
                            }
                            info!(
                                stream_id = %params.stream_id,
                                effective = effective.bits(),
                                "signaling handshake complete; opening media sockets"
                            );
                            supervisor.open_all(effective, &urls).await;

                            let subscribe = EventSubscription::subscribe(&[
                                wire::signaling_events::ACTIVE_SPEAKER_CHANGE,
                                wire::signaling_events::PARTICIPANT_JOIN,
                                wire::signaling_events::PARTICIPANT_LEAVE,
                            ]);
                            if let Err(e) = send_json(&mut ws, &subscribe).await {
                                warn!(stream_id = %params.stream_id, error = %e, "event subscription failed");
                                break SignalingExit::Retry;
                            }
                        }
                        ServerFrame::SignalingHandshakeAck(_) => {
                            debug!(stream_id = %params.stream_id, "duplicate handshake ack ignored");
                        }
                        ServerFrame::KeepAlive(ka) => {
                            {
                                let mut meta = metadata.write().await;
                                meta.last_keep_alive = Some(ka.timestamp);
                                meta.rtt_ms = Some(keep_alive_rtt(ka.timestamp));
                            }
                            if let Err(e) = send_json(&mut ws, &KeepAliveResponse::echo(ka.timestamp)).await {
                                warn!(stream_id = %params.stream_id, error = %e, "keep-alive echo failed");
                                break SignalingExit::Retry;
                            }
                        }
                        ServerFrame::Event(event) => {
                            emit_event(
                                params,
                                StreamEventKind::Signaling {
                                    event_type: event.event_type,
                                    timestamp: event.timestamp,
                                    content: event.content,
                                },
                            )
                            .await;
                        }
                        ServerFrame::StreamState(change) => {
                            emit_event(
                                params,
                                StreamEventKind::StreamStateChanged {
                                    state: change.state,
                                    reason: change.reason,
                                    timestamp: change.timestamp,
                                },
                            )
                            .await;
                            if change.is_meeting_ended() {
                                info!(stream_id = %params.stream_id, "meeting ended; closing session");
                                let _ = ws.close(None).await;
                                break SignalingExit::Ended;
                            }
                        }
                        ServerFrame::SessionState(change) => {
                            emit_event(
                                params,
                                StreamEventKind::SessionStateChanged {
                                    state: change.state,
                                    stop_reason: change.stop_reason,
                                    timestamp: change.timestamp,
                                },
                            )
                            .await;
                        }
                        ServerFrame::MediaHandshakeAck(_) | ServerFrame::Media { .. } => {
                            debug!(stream_id = %params.stream_id, "media frame on signaling socket ignored");
                        }
                        ServerFrame::Unknown(tag) => {
                            debug!(stream_id = %params.stream_id, tag, "unknown signaling frame dropped");
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = ws.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) => {
                    info!(stream_id = %params.stream_id, "signaling close frame");
                    break SignalingExit::Retry;
                }
                Some(Ok(_)) => {}
            }
        }
    };

    // Tear down every media task, including any still in CONNECTING.
    let _ = stop_tx.send(true);
    supervisor.shutdown().await;
    exit
}

pub(super) async fn send_json<S, T>(ws: &mut S, frame: &T) -> Result<(), String>
where
    S: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    T: serde::Serialize,
{
    let json = serde_json::to_string(frame).map_err(|e| e.to_string())?;
    ws.send(Message::Text(json.into()))
        .await
        .map_err(|e| e.to_string())
}
