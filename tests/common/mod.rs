#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose;
use call_relay::transport::channel::{self, ChannelPeer};
use call_relay::{
    Connection, Error, Frame, ModelConnector, RelayConfig, Result, SessionConfig, SessionObserver, Side,
};
use serde_json::{Value, json};
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(2);

pub fn config() -> RelayConfig {
    RelayConfig::builder()
        .api_key("test-key")
        .setup_timeout(Duration::from_millis(400))
        .drain_timeout(Duration::from_millis(300))
        .max_consecutive_parse_errors(3)
        .build()
        .unwrap()
}

/// Hands the test the remote end of every model connection it opens.
pub struct MockConnector {
    peers: mpsc::UnboundedSender<ChannelPeer>,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ChannelPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { peers }), rx)
    }
}

#[async_trait]
impl ModelConnector for MockConnector {
    async fn connect(&self, _session: &SessionConfig) -> Result<Connection> {
        let (conn, peer) = channel::boxed(64);
        self.peers.send(peer).map_err(|_| Error::ConnectionClosed)?;
        Ok(conn)
    }
}

pub struct RefusingConnector;

#[async_trait]
impl ModelConnector for RefusingConnector {
    async fn connect(&self, _session: &SessionConfig) -> Result<Connection> {
        Err(Error::Transport("connection refused".to_string()))
    }
}

/// Never finishes opening the model leg.
pub struct HangingConnector;

#[async_trait]
impl ModelConnector for HangingConnector {
    async fn connect(&self, _session: &SessionConfig) -> Result<Connection> {
        std::future::pending().await
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    pub forwarded: Mutex<Vec<(Side, u64)>>,
    pub marks: Mutex<Vec<String>>,
    pub text: Mutex<String>,
    pub errors: Mutex<Vec<String>>,
}

impl SessionObserver for RecordingObserver {
    fn on_frame_forwarded(&self, _call_id: &str, to: Side, frame: &Frame) {
        self.forwarded.lock().unwrap().push((to, frame.seq()));
    }

    fn on_model_text(&self, _call_id: &str, delta: &str) {
        self.text.lock().unwrap().push_str(delta);
    }

    fn on_model_error(&self, _call_id: &str, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }

    fn on_mark(&self, _call_id: &str, label: &str) {
        self.marks.lock().unwrap().push(label.to_string());
    }
}

pub fn b64(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}

/// 20 ms of 8 kHz mu-law filled with `byte`.
pub fn mulaw_chunk(byte: u8) -> String {
    b64(&[byte; 160])
}

/// 20 ms of 24 kHz PCM16 holding a constant `sample`.
pub fn pcm_chunk(sample: i16) -> String {
    let bytes: Vec<u8> = std::iter::repeat_n(sample.to_le_bytes(), 480).flatten().collect();
    b64(&bytes)
}

pub fn start(call_sid: &str) -> String {
    json!({
        "event": "start",
        "sequenceNumber": "1",
        "streamSid": format!("MZ-{call_sid}"),
        "start": {
            "streamSid": format!("MZ-{call_sid}"),
            "callSid": call_sid,
            "tracks": ["inbound"],
            "mediaFormat": { "encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1 }
        }
    })
    .to_string()
}

pub fn media(payload: &str) -> String {
    json!({ "event": "media", "media": { "track": "inbound", "payload": payload } }).to_string()
}

pub fn stop() -> String {
    json!({ "event": "stop" }).to_string()
}

pub fn mark(name: &str) -> String {
    json!({ "event": "mark", "mark": { "name": name } }).to_string()
}

pub fn session_updated() -> String {
    json!({ "type": "session.updated", "session": { "voice": "verse" } }).to_string()
}

pub fn audio_delta(payload: &str) -> String {
    json!({ "type": "response.audio.delta", "response_id": "resp_1", "delta": payload }).to_string()
}

pub fn speech_started() -> String {
    json!({ "type": "input_audio_buffer.speech_started", "audio_start_ms": 100 }).to_string()
}

/// Next message from the relay as JSON, failing the test on timeout.
pub async fn recv_json(peer: &mut ChannelPeer) -> Option<Value> {
    let raw = tokio::time::timeout(WAIT, peer.recv()).await.expect("timed out waiting for relay")?;
    Some(serde_json::from_str(&raw).unwrap())
}

/// Collect everything the relay sends until it closes the connection.
pub async fn drain(peer: &mut ChannelPeer) -> Vec<Value> {
    let mut out = Vec::new();
    while let Some(value) = recv_json(peer).await {
        out.push(value);
    }
    out
}

/// Assert nothing arrives from the relay for a short while.
pub async fn assert_silent(peer: &mut ChannelPeer) {
    let quiet = tokio::time::timeout(Duration::from_millis(100), peer.recv()).await;
    assert!(quiet.is_err(), "expected no message, got {quiet:?}");
}

pub async fn next_model(models: &mut mpsc::UnboundedReceiver<ChannelPeer>) -> ChannelPeer {
    tokio::time::timeout(WAIT, models.recv())
        .await
        .expect("timed out waiting for model connection")
        .expect("connector dropped")
}
