//! Per-stream session: one signaling socket plus one media sub-socket per
//! subscribed media type.
//!
//! The session task owns the reconnect state machine: a retryable failure
//! schedules a single 3-second debounce and dials again; a non-retryable
//! error (auth, security, request, meeting, stream — or a meeting-ended
//! stream state) closes everything for good.  Media sub-sockets report back
//! over a notice channel tagged with a generation counter so a close
//! callback from a torn-down connection attempt is ignored.

pub mod events;
mod media;
mod signaling;

use crate::config::{Credentials, ProductKind};
use crate::session::events::StreamEvent;
use chrono::{DateTime, Utc};
use rtms_protocol::media::{MediaKind, MediaMask, MediaParams};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use tracing::{info, warn};

pub const RECONNECT_DEBOUNCE: Duration = Duration::from_secs(3);

/// Socket lifecycle states, also used as the session-level state (the
/// signaling socket's state is the session's).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Idle,
    Connecting,
    Authenticated,
    Streaming,
    Closed,
    Error,
}

impl SocketState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SocketState::Closed | SocketState::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SocketState::Idle => "idle",
            SocketState::Connecting => "connecting",
            SocketState::Authenticated => "authenticated",
            SocketState::Streaming => "streaming",
            SocketState::Closed => "closed",
            SocketState::Error => "error",
        }
    }
}

/// Live stats for one stream, shared between the session tasks and the
/// registry (and archived on removal).
#[derive(Debug, Clone)]
pub struct StreamMetadata {
    pub stream_id: String,
    pub meeting_uuid: String,
    pub product: ProductKind,
    pub state: SocketState,
    pub media_states: HashMap<MediaKind, SocketState>,
    /// Effective mask after handshake; empty before.
    pub media_mask: MediaMask,
    pub media_params: MediaParams,
    /// Media params are fixed at the first media handshake response.
    pub params_negotiated: bool,
    pub first_packet_ts: Option<u64>,
    pub last_packet_ts: Option<u64>,
    pub last_keep_alive: Option<u64>,
    pub rtt_ms: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl StreamMetadata {
    pub fn new(
        stream_id: impl Into<String>,
        meeting_uuid: impl Into<String>,
        product: ProductKind,
    ) -> Self {
        StreamMetadata {
            stream_id: stream_id.into(),
            meeting_uuid: meeting_uuid.into(),
            product,
            state: SocketState::Idle,
            media_states: HashMap::new(),
            media_mask: MediaMask::empty(),
            media_params: MediaParams::default(),
            params_negotiated: false,
            first_packet_ts: None,
            last_packet_ts: None,
            last_keep_alive: None,
            rtt_ms: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub(crate) fn record_packet(&mut self, timestamp: u64) {
        if self.first_packet_ts.is_none() {
            self.first_packet_ts = Some(timestamp);
        }
        self.last_packet_ts = Some(timestamp);
    }
}

#[derive(Debug)]
pub enum SessionCommand {
    Stop,
}

/// Handle held by the registry and the router.
pub struct SessionHandle {
    metadata: Arc<RwLock<StreamMetadata>>,
    stream_id: String,
    meeting_uuid: String,
    control: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    fn new(
        stream_id: String,
        meeting_uuid: String,
        metadata: Arc<RwLock<StreamMetadata>>,
        control: mpsc::Sender<SessionCommand>,
    ) -> Self {
        SessionHandle {
            metadata,
            stream_id,
            meeting_uuid,
            control,
        }
    }

    /// A handle with no running task behind it (registry tests).
    pub fn detached(metadata: StreamMetadata) -> Self {
        let (control, _rx) = mpsc::channel(1);
        SessionHandle::new(
            metadata.stream_id.clone(),
            metadata.meeting_uuid.clone(),
            Arc::new(RwLock::new(metadata)),
            control,
        )
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn meeting_uuid(&self) -> &str {
        &self.meeting_uuid
    }

    pub fn metadata(&self) -> &Arc<RwLock<StreamMetadata>> {
        &self.metadata
    }

    pub async fn snapshot(&self) -> StreamMetadata {
        self.metadata.read().await.clone()
    }

    pub async fn state(&self) -> SocketState {
        self.metadata.read().await.state
    }

    pub async fn is_terminal(&self) -> bool {
        self.state().await.is_terminal()
    }

    /// Ask the session to stop.  Idempotent; a second stop on a finished
    /// session is a no-op.
    pub async fn stop(&self) {
        let _ = self.control.send(SessionCommand::Stop).await;
    }
}

/// Everything needed to dial one stream.
#[derive(Clone)]
pub struct SessionParams {
    pub stream_id: String,
    pub meeting_uuid: String,
    pub product: ProductKind,
    pub signaling_url: String,
    pub credentials: Credentials,
    /// Raw configured mask; may carry the all-media sentinel.
    pub subscribe_mask: u8,
    pub fillers_enabled: bool,
    pub media_params: MediaParams,
    pub events: mpsc::Sender<StreamEvent>,
}

/// Echo turnaround for a keep-alive probe: the server stamps the probe at
/// send time, so receipt minus stamp is the measured round trip.  A stamp
/// from a clock ahead of ours saturates to zero.
pub(crate) fn keep_alive_rtt(probe_timestamp_ms: u64) -> u64 {
    let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
    now.saturating_sub(probe_timestamp_ms)
}

/// Stamp the stream envelope onto an event and hand it to the consumer.
pub(crate) async fn emit_event(params: &SessionParams, kind: events::StreamEventKind) {
    let event = StreamEvent {
        meeting_uuid: params.meeting_uuid.clone(),
        stream_id: params.stream_id.clone(),
        product: params.product,
        kind,
    };
    if params.events.send(event).await.is_err() {
        warn!(stream_id = %params.stream_id, "event consumer is gone");
    }
}

/// Spawn the session task and return its handle.
pub fn spawn_session(params: SessionParams) -> Arc<SessionHandle> {
    let mut initial = StreamMetadata::new(&params.stream_id, &params.meeting_uuid, params.product);
    initial.media_params = params.media_params;
    let metadata = Arc::new(RwLock::new(initial));
    let (control_tx, control_rx) = mpsc::channel(8);
    let handle = Arc::new(SessionHandle::new(
        params.stream_id.clone(),
        params.meeting_uuid.clone(),
        metadata.clone(),
        control_tx,
    ));
    tokio::spawn(run_session(params, metadata, control_rx));
    handle
}

/// Why one signaling connection ended.
#[derive(Debug)]
pub(crate) enum SignalingExit {
    /// Stop command; close for good.
    Stopped,
    /// The meeting ended (`msg_type 8 {state:4, reason:6}`).
    Ended,
    /// Non-retryable error; no reconnect.
    Fatal,
    /// Retryable drop; reconnect after the debounce.
    Retry,
}

async fn run_session(
    params: SessionParams,
    metadata: Arc<RwLock<StreamMetadata>>,
    mut control_rx: mpsc::Receiver<SessionCommand>,
) {
    info!(
        stream_id = %params.stream_id,
        meeting_uuid = %params.meeting_uuid,
        product = %params.product,
        "stream session starting"
    );

    loop {
        let exit = signaling::run_signaling(&params, &metadata, &mut control_rx).await;
        match exit {
            SignalingExit::Stopped | SignalingExit::Ended => {
                metadata.write().await.state = SocketState::Closed;
                break;
            }
            SignalingExit::Fatal => {
                metadata.write().await.state = SocketState::Error;
                break;
            }
            SignalingExit::Retry => {
                metadata.write().await.state = SocketState::Idle;
                warn!(
                    stream_id = %params.stream_id,
                    "signaling dropped; reconnecting in {}s",
                    RECONNECT_DEBOUNCE.as_secs()
                );
                // Single debounce timer; a stop command cancels it.
                tokio::select! {
                    () = tokio::time::sleep(RECONNECT_DEBOUNCE) => {}
                    cmd = control_rx.recv() => {
                        if matches!(cmd, Some(SessionCommand::Stop) | None) {
                            metadata.write().await.state = SocketState::Closed;
                            break;
                        }
                    }
                }
            }
        }
    }

    let mut meta = metadata.write().await;
    meta.ended_at = Some(Utc::now());
    for state in meta.media_states.values_mut() {
        if !state.is_terminal() {
            *state = SocketState::Closed;
        }
    }
    info!(stream_id = %params.stream_id, state = meta.state.as_str(), "stream session finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_packet_tracking_keeps_first_and_last() {
        let mut meta = StreamMetadata::new("S1", "UUID-A", ProductKind::Meeting);
        meta.record_packet(5_000);
        meta.record_packet(6_000);
        meta.record_packet(7_000);
        assert_eq!(meta.first_packet_ts, Some(5_000));
        assert_eq!(meta.last_packet_ts, Some(7_000));
        assert!(meta.first_packet_ts <= meta.last_packet_ts);
    }

    #[test]
    fn keep_alive_rtt_tracks_the_probe_stamp_and_saturates() {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap();
        assert!(keep_alive_rtt(now - 250) >= 250);
        assert_eq!(keep_alive_rtt(now + 60_000), 0);
    }

    #[test]
    fn terminal_states() {
        assert!(SocketState::Closed.is_terminal());
        assert!(SocketState::Error.is_terminal());
        assert!(!SocketState::Streaming.is_terminal());
        assert!(!SocketState::Idle.is_terminal());
    }
}
