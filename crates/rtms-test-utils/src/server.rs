//! The mock vendor media server.
//!
//! Two TCP listeners: signaling and media.  The signaling handler answers
//! `msg_type 1` handshakes with a configurable status and advertises media
//! URLs (all pointing at the media listener) for the configured kinds; the
//! media handler answers `msg_type 3` and learns which kind the socket
//! carries from the handshake's `media_type` bit.  Both accept loops keep
//! accepting, so reconnect behaviour is observable through accept counts.

use futures_util::{SinkExt, StreamExt};
use rtms_protocol::media::{MediaKind, MediaMask};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct MockRtmsConfig {
    /// Kinds the handshake response advertises URLs for.
    pub available: Vec<MediaKind>,
    /// `status_code` for signaling handshake replies.
    pub signaling_status: i64,
    /// `status_code` for media handshake replies.
    pub media_status: i64,
}

impl Default for MockRtmsConfig {
    fn default() -> Self {
        MockRtmsConfig {
            available: vec![MediaKind::Audio, MediaKind::Transcript],
            signaling_status: 0,
            media_status: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordedChannel {
    Signaling,
    Media(MediaKind),
}

/// One client frame the server saw.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub channel: RecordedChannel,
    pub msg_type: u8,
    pub frame: Value,
}

#[derive(Default)]
struct Shared {
    received: Vec<Recorded>,
    signaling_out: Option<mpsc::Sender<String>>,
    media_out: HashMap<MediaKind, mpsc::Sender<String>>,
    signaling_accepts: usize,
    media_accepts: HashMap<MediaKind, usize>,
}

pub struct MockRtmsServer {
    config: MockRtmsConfig,
    signaling_addr: SocketAddr,
    media_addr: SocketAddr,
    shared: Arc<Mutex<Shared>>,
    _accept_tasks: Vec<JoinHandle<()>>,
}

impl MockRtmsServer {
    pub async fn start(config: MockRtmsConfig) -> std::io::Result<Self> {
        let signaling = TcpListener::bind("127.0.0.1:0").await?;
        let media = TcpListener::bind("127.0.0.1:0").await?;
        let signaling_addr = signaling.local_addr()?;
        let media_addr = media.local_addr()?;
        let shared = Arc::new(Mutex::new(Shared::default()));

        let signaling_task = tokio::spawn(accept_signaling(
            signaling,
            shared.clone(),
            config.clone(),
            media_addr,
        ));
        let media_task = tokio::spawn(accept_media(media, shared.clone(), config.clone()));

        Ok(MockRtmsServer {
            config,
            signaling_addr,
            media_addr,
            shared,
            _accept_tasks: vec![signaling_task, media_task],
        })
    }

    pub fn signaling_url(&self) -> String {
        format!("ws://{}", self.signaling_addr)
    }

    pub fn media_url(&self, kind: MediaKind) -> String {
        format!("ws://{}/{}", self.media_addr, kind.url_key())
    }

    pub fn config(&self) -> &MockRtmsConfig {
        &self.config
    }

    /// Send a frame on the most recent signaling connection.
    pub async fn push_signaling(&self, frame: &Value) -> bool {
        let tx = self.shared.lock().await.signaling_out.clone();
        match tx {
            Some(tx) => tx.send(frame.to_string()).await.is_ok(),
            None => false,
        }
    }

    /// Send a frame on the most recent media connection for `kind`.
    pub async fn push_media(&self, kind: MediaKind, frame: &Value) -> bool {
        let tx = self.shared.lock().await.media_out.get(&kind).cloned();
        match tx {
            Some(tx) => tx.send(frame.to_string()).await.is_ok(),
            None => false,
        }
    }

    pub async fn recorded(&self) -> Vec<Recorded> {
        self.shared.lock().await.received.clone()
    }

    /// Message types seen on one channel, in arrival order.
    pub async fn msg_types_on(&self, channel: RecordedChannel) -> Vec<u8> {
        self.shared
            .lock()
            .await
            .received
            .iter()
            .filter(|r| r.channel == channel)
            .map(|r| r.msg_type)
            .collect()
    }

    pub async fn signaling_accepts(&self) -> usize {
        self.shared.lock().await.signaling_accepts
    }

    pub async fn media_accepts(&self, kind: MediaKind) -> usize {
        self.shared
            .lock()
            .await
            .media_accepts
            .get(&kind)
            .copied()
            .unwrap_or(0)
    }

    pub async fn media_accepts_total(&self) -> usize {
        self.shared.lock().await.media_accepts.values().sum()
    }

    /// Kinds that have connected at least once.
    pub async fn connected_media_kinds(&self) -> Vec<MediaKind> {
        let shared = self.shared.lock().await;
        let mut kinds: Vec<MediaKind> = shared.media_accepts.keys().copied().collect();
        kinds.sort_by_key(|k| k.flag().bits());
        kinds
    }
}

async fn accept_signaling(
    listener: TcpListener,
    shared: Arc<Mutex<Shared>>,
    config: MockRtmsConfig,
    media_addr: SocketAddr,
) {
    while let Ok((stream, _)) = listener.accept().await {
        let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
            continue;
        };
        let (tx, rx) = mpsc::channel::<String>(64);
        {
            let mut state = shared.lock().await;
            state.signaling_accepts += 1;
            state.signaling_out = Some(tx);
        }
        tokio::spawn(handle_signaling(
            ws,
            rx,
            shared.clone(),
            config.clone(),
            media_addr,
        ));
    }
}

async fn handle_signaling(
    ws: tokio_tungstenite::WebSocketStream<TcpStream>,
    mut out: mpsc::Receiver<String>,
    shared: Arc<Mutex<Shared>>,
    config: MockRtmsConfig,
    media_addr: SocketAddr,
) {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            injected = out.recv() => match injected {
                Some(text) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let Some((msg_type, frame)) = parse(&text) else { continue };
                    shared.lock().await.received.push(Recorded {
                        channel: RecordedChannel::Signaling,
                        msg_type,
                        frame,
                    });
                    if msg_type == 1 {
                        let reply = signaling_handshake_reply(&config, media_addr);
                        if sink.send(Message::Text(reply.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = sink.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    }
    debug!("mock signaling connection finished");
}

fn signaling_handshake_reply(config: &MockRtmsConfig, media_addr: SocketAddr) -> Value {
    if config.signaling_status != 0 {
        return json!({
            "msg_type": 2,
            "status_code": config.signaling_status,
            "reason": "rejected by mock",
        });
    }
    let mut urls = serde_json::Map::new();
    for kind in &config.available {
        urls.insert(
            kind.url_key().to_owned(),
            Value::String(format!("ws://{}/{}", media_addr, kind.url_key())),
        );
    }
    json!({
        "msg_type": 2,
        "status_code": 0,
        "sequence": 0,
        "media_server": { "server_urls": Value::Object(urls) },
    })
}

async fn accept_media(listener: TcpListener, shared: Arc<Mutex<Shared>>, config: MockRtmsConfig) {
    while let Ok((stream, _)) = listener.accept().await {
        let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
            continue;
        };
        tokio::spawn(handle_media(ws, shared.clone(), config.clone()));
    }
}

async fn handle_media(
    ws: tokio_tungstenite::WebSocketStream<TcpStream>,
    shared: Arc<Mutex<Shared>>,
    config: MockRtmsConfig,
) {
    let (mut sink, mut stream) = ws.split();
    let (tx, mut out) = mpsc::channel::<String>(64);
    let mut kind: Option<MediaKind> = None;

    loop {
        tokio::select! {
            injected = out.recv() => match injected {
                Some(text) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let Some((msg_type, frame)) = parse(&text) else { continue };
                    if msg_type == 3 && kind.is_none() {
                        let bits = frame
                            .get("media_type")
                            .and_then(Value::as_u64)
                            .unwrap_or(0);
                        #[allow(clippy::cast_possible_truncation)]
                        let mask = MediaMask::from_bits_truncate(bits as u8);
                        kind = MediaKind::in_mask(mask).next();
                        if let Some(kind) = kind {
                            let mut state = shared.lock().await;
                            *state.media_accepts.entry(kind).or_insert(0) += 1;
                            state.media_out.insert(kind, tx.clone());
                        }
                        let reply = media_handshake_reply(&config);
                        if sink.send(Message::Text(reply.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    if let Some(kind) = kind {
                        shared.lock().await.received.push(Recorded {
                            channel: RecordedChannel::Media(kind),
                            msg_type,
                            frame,
                        });
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = sink.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    }
    debug!("mock media connection finished");
}

fn media_handshake_reply(config: &MockRtmsConfig) -> Value {
    if config.media_status != 0 {
        return json!({
            "msg_type": 4,
            "status_code": config.media_status,
            "reason": "rejected by mock",
        });
    }
    json!({
        "msg_type": 4,
        "status_code": 0,
        "media_params": {
            "audio_sample_rate": 1,
            "audio_send_rate_ms": 20,
            "video_fps": 25,
        },
    })
}

#[allow(clippy::cast_possible_truncation)]
fn parse(text: &str) -> Option<(u8, Value)> {
    let frame: Value = serde_json::from_str(text).ok()?;
    let msg_type = frame.get("msg_type")?.as_u64()? as u8;
    Some((msg_type, frame))
}
