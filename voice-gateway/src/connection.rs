//! The voice control WebSocket: identify, heartbeat, protocol select,
//! speaking/video status, and resume (spec §4.5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{Error, Result};
use crate::messages::{
    CodecDescription, Envelope, HelloPayload, IdentifyPayload, ReadyPayload, ResumePayload,
    SelectProtocolAckPayload, SelectProtocolData, SelectProtocolPayload, SpeakingPayload,
    VideoPayload, VideoResolution, VideoSimulcastLayer,
};
use crate::opcode;
use crate::state::{ConnectionState, SessionInfo};

/// The fixed heartbeat nonce used on every HEARTBEAT frame (spec §4.5).
const HEARTBEAT_NONCE: u64 = 42069;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

struct Inner {
    state: StdMutex<ConnectionState>,
    session: StdMutex<SessionInfo>,
    ready: StdMutex<Option<ReadyPayload>>,
    protocol_ack: StdMutex<Option<SelectProtocolAckPayload>>,
    outbound: StdMutex<Option<mpsc::UnboundedSender<Message>>>,
    force_chacha20: bool,
    started: AtomicBool,
    stopped: AtomicBool,
    hello_notify: Notify,
    ready_notify: Notify,
    ack_notify: Notify,
    resumed_notify: Notify,
    closed_notify: Notify,
    stop_notify: Notify,
    /// The error that closed the connection, if any. Unset on a deliberate
    /// `stop()` and on a resumable close that is about to reconnect (spec §7:
    /// only a non-resumable close is surfaced as an error).
    last_close_error: StdMutex<Option<Error>>,
}

/// A single voice-gateway v7 control connection. Cheap to clone (an `Arc`
/// handle); the WebSocket itself lives in a background task spawned the
/// first time both the session id and voice-server token are known.
#[derive(Clone)]
pub struct VoiceGatewayConnection {
    inner: Arc<Inner>,
}

impl VoiceGatewayConnection {
    pub fn new(session: SessionInfo, force_chacha20: bool) -> Self {
        let inner = Arc::new(Inner {
            state: StdMutex::new(ConnectionState::Disconnected),
            session: StdMutex::new(session),
            ready: StdMutex::new(None),
            protocol_ack: StdMutex::new(None),
            outbound: StdMutex::new(None),
            force_chacha20,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            hello_notify: Notify::new(),
            ready_notify: Notify::new(),
            ack_notify: Notify::new(),
            resumed_notify: Notify::new(),
            closed_notify: Notify::new(),
            stop_notify: Notify::new(),
            last_close_error: StdMutex::new(None),
        });
        Self { inner }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock().unwrap()
    }

    pub fn ready_info(&self) -> Option<ReadyPayload> {
        self.inner.ready.lock().unwrap().clone()
    }

    pub fn set_session(&self, session_id: impl Into<String>) {
        self.inner.session.lock().unwrap().set_session(session_id);
        self.maybe_start();
    }

    pub fn set_tokens(&self, server_endpoint: impl Into<String>, token: impl Into<String>) {
        self.inner.session.lock().unwrap().set_tokens(server_endpoint, token);
        self.maybe_start();
    }

    fn maybe_start(&self) {
        let ready = self.inner.session.lock().unwrap().ready_to_identify();
        if !ready || self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let endpoint = self
            .inner
            .session
            .lock()
            .unwrap()
            .server_endpoint
            .clone()
            .expect("ready_to_identify implies server_endpoint is set");
        let url = format!("wss://{endpoint}/?v=7");
        let inner = self.inner.clone();
        tokio::spawn(async move { run(inner, url).await });
    }

    /// Sends SELECT_PROTOCOL with the discovered UDP address/port and chosen
    /// AEAD mode, and awaits SELECT_PROTOCOL_ACK (spec §4.5, §4.1).
    pub async fn set_protocols(
        &self,
        address: String,
        port: u16,
        peer_supports_aes_gcm: bool,
    ) -> Result<SelectProtocolAckPayload> {
        let mode = if peer_supports_aes_gcm && !self.inner.force_chacha20 {
            "aead_aes256_gcm_rtpsize"
        } else {
            "aead_xchacha20_poly1305_rtpsize"
        };

        *self.inner.state.lock().unwrap() = ConnectionState::SelectingProtocol;
        let payload = SelectProtocolPayload {
            protocol: "udp",
            data: SelectProtocolData {
                address,
                port,
                mode: mode.to_string(),
            },
            codecs: vec![
                CodecDescription {
                    name: "opus",
                    kind: "audio",
                    priority: 1000,
                    payload_type: 120,
                    encode: true,
                    decode: true,
                },
                CodecDescription {
                    name: "H264",
                    kind: "video",
                    priority: 1000,
                    payload_type: 101,
                    encode: true,
                    decode: true,
                },
                CodecDescription {
                    name: "H265",
                    kind: "video",
                    priority: 1000,
                    payload_type: 103,
                    encode: true,
                    decode: true,
                },
                CodecDescription {
                    name: "VP8",
                    kind: "video",
                    priority: 1000,
                    payload_type: 105,
                    encode: true,
                    decode: true,
                },
                CodecDescription {
                    name: "VP9",
                    kind: "video",
                    priority: 1000,
                    payload_type: 107,
                    encode: true,
                    decode: true,
                },
                CodecDescription {
                    name: "AV1",
                    kind: "video",
                    priority: 1000,
                    payload_type: 109,
                    encode: true,
                    decode: true,
                },
            ],
        };
        self.send(opcode::SELECT_PROTOCOL, &payload)?;

        loop {
            if let Some(ack) = self.inner.protocol_ack.lock().unwrap().clone() {
                return Ok(ack);
            }
            if self.inner.stopped.load(Ordering::SeqCst) {
                return Err(Error::Stopped);
            }
            self.inner.ack_notify.notified().await;
        }
    }

    pub fn set_speaking(&self, speaking: bool, ssrc: u32) -> Result<()> {
        self.send(
            opcode::SPEAKING,
            &SpeakingPayload {
                speaking: if speaking { 1 } else { 0 },
                delay: 0,
                ssrc,
            },
        )
    }

    /// `max_bitrate`/`max_framerate`/`max_resolution` derive from the active
    /// stream options; passing `None` disables video by sending SSRCs as 0
    /// (spec §4.5).
    #[allow(clippy::too_many_arguments)]
    pub fn set_video_status(
        &self,
        audio_ssrc: u32,
        video: Option<(u32, u32, u32, u32, u32, u32)>,
    ) -> Result<()> {
        let (video_ssrc, rtx_ssrc, max_bitrate_kbps, fps, width, height) =
            video.unwrap_or((0, 0, 0, 0, 0, 0));
        let payload = VideoPayload {
            audio_ssrc,
            video_ssrc,
            rtx_ssrc,
            streams: vec![VideoSimulcastLayer {
                kind: "video",
                rid: "100",
                quality: 100,
                ssrc: video_ssrc,
                rtx_ssrc,
                max_bitrate: max_bitrate_kbps * 1000,
                max_framerate: fps,
                max_resolution: VideoResolution {
                    kind: "fixed",
                    width,
                    height,
                },
            }],
        };
        self.send(opcode::VIDEO, &payload)
    }

    pub async fn wait_ready(&self) -> ReadyPayload {
        loop {
            if let Some(ready) = self.ready_info() {
                return ready;
            }
            self.inner.ready_notify.notified().await;
        }
    }

    /// Awaits the error that terminates this connection (spec §7's
    /// propagation policy: a non-resumable close, or a transport/connect
    /// failure). Never resolves after a deliberate [`Self::stop`] or while a
    /// resumable close is being transparently reconnected.
    pub async fn wait_closed(&self) -> Error {
        loop {
            if let Some(err) = self.inner.last_close_error.lock().unwrap().take() {
                return err;
            }
            if *self.inner.state.lock().unwrap() == ConnectionState::Closed {
                std::future::pending::<()>().await;
            }
            self.inner.closed_notify.notified().await;
        }
    }

    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.stop_notify.notify_waiters();
        self.inner.ack_notify.notify_waiters();
        self.inner.ready_notify.notify_waiters();
    }

    fn send<T: serde::Serialize>(&self, op: u8, data: &T) -> Result<()> {
        let envelope = Envelope::new(op, data)?;
        let text = serde_json::to_string(&envelope)?;
        let sender = self.inner.outbound.lock().unwrap().clone();
        if let Some(sender) = sender {
            let _ = sender.send(Message::Text(text.into()));
        }
        Ok(())
    }
}

async fn run(inner: Arc<Inner>, url: String) {
    loop {
        *inner.state.lock().unwrap() = ConnectionState::Connecting;
        let ws_stream = match tokio_tungstenite::connect_async(&url).await {
            Ok((stream, _response)) => stream,
            Err(err) => {
                log::warn!("voice gateway connect failed: {err}");
                *inner.last_close_error.lock().unwrap() = Some(Error::WebSocket(err));
                *inner.state.lock().unwrap() = ConnectionState::Closed;
                inner.closed_notify.notify_waiters();
                return;
            }
        };

        let (sink, mut stream) = ws_stream.split();
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        *inner.outbound.lock().unwrap() = Some(msg_tx.clone());
        let writer = tokio::spawn(run_writer(sink, msg_rx));

        let resuming = *inner.state.lock().unwrap() == ConnectionState::Resuming;
        if resuming {
            let session = inner.session.lock().unwrap().clone();
            let resume = ResumePayload {
                server_id: session.guild_id.clone(),
                session_id: session.session_id.clone().unwrap_or_default(),
                token: session.token.clone().unwrap_or_default(),
            };
            if let Ok(envelope) = Envelope::new(opcode::RESUME, &resume) {
                if let Ok(text) = serde_json::to_string(&envelope) {
                    let _ = msg_tx.send(Message::Text(text.into()));
                }
            }
        } else {
            *inner.state.lock().unwrap() = ConnectionState::Identifying;
            let session = inner.session.lock().unwrap().clone();
            let identify = IdentifyPayload {
                server_id: session.guild_id.clone(),
                user_id: session.user_id.clone(),
                session_id: session.session_id.clone().unwrap_or_default(),
                token: session.token.clone().unwrap_or_default(),
            };
            if let Ok(envelope) = Envelope::new(opcode::IDENTIFY, &identify) {
                if let Ok(text) = serde_json::to_string(&envelope) {
                    let _ = msg_tx.send(Message::Text(text.into()));
                }
            }
        }

        let mut heartbeat: Option<JoinHandle<()>> = None;
        let close_code = loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_inbound(&inner, &text, &msg_tx, &mut heartbeat);
                    }
                    Some(Ok(Message::Close(close_frame))) => break close_frame.map(|f| f.code.into()),
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        log::warn!("voice gateway read error: {err}");
                        break None;
                    }
                    None => break None,
                },
                _ = inner.stop_notify.notified() => {
                    let _ = msg_tx.send(Message::Close(Some(CloseFrame {
                        code: 1000u16.into(),
                        reason: "client stop".into(),
                    })));
                    break None;
                }
            }
        };

        if let Some(handle) = heartbeat.take() {
            handle.abort();
        }
        writer.abort();

        if inner.stopped.load(Ordering::SeqCst) {
            *inner.state.lock().unwrap() = ConnectionState::Closed;
            inner.closed_notify.notify_waiters();
            return;
        }

        let resume_eligible = inner.state.lock().unwrap().resume_eligible();
        let resumable_code = is_resumable_close_code(close_code);
        if resume_eligible && resumable_code {
            *inner.state.lock().unwrap() = ConnectionState::Resuming;
            inner.session.lock().unwrap().resuming = true;
            // The voice server endpoint does not change across a resume.
            continue;
        }

        let close_error = if resumable_code {
            Error::ControlClosedResumable(close_code)
        } else {
            Error::ControlClosedTerminal(close_code)
        };
        *inner.last_close_error.lock().unwrap() = Some(close_error);
        *inner.state.lock().unwrap() = ConnectionState::Closed;
        inner.closed_notify.notify_waiters();
        return;
    }
}

/// Whether a control close code is eligible for resume, independent of the
/// connection's own state (spec §4.5: code 4015, or any code below 4000).
fn is_resumable_close_code(code: Option<u16>) -> bool {
    matches!(code, Some(code) if code == 4015 || code < 4000)
}

async fn run_writer(mut sink: WsSink, mut messages: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = messages.recv().await {
        if sink.send(message).await.is_err() {
            break;
        }
    }
}

fn handle_inbound(
    inner: &Arc<Inner>,
    text: &str,
    outbound: &mpsc::UnboundedSender<Message>,
    heartbeat: &mut Option<JoinHandle<()>>,
) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(env) => env,
        Err(err) => {
            log::warn!("malformed voice gateway frame: {err}");
            return;
        }
    };

    match envelope.op {
        opcode::HELLO => {
            let hello: HelloPayload = match serde_json::from_value(envelope.d) {
                Ok(h) => h,
                Err(_) => return,
            };
            *inner.state.lock().unwrap() = ConnectionState::HelloReceived;
            inner.hello_notify.notify_waiters();
            *inner.state.lock().unwrap() = ConnectionState::Identified;

            if heartbeat.is_none() {
                let outbound = outbound.clone();
                let interval_ms = hello.heartbeat_interval;
                *heartbeat = Some(tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
                    loop {
                        ticker.tick().await;
                        let envelope = match Envelope::new(opcode::HEARTBEAT, &HEARTBEAT_NONCE) {
                            Ok(e) => e,
                            Err(_) => continue,
                        };
                        if let Ok(text) = serde_json::to_string(&envelope) {
                            if outbound.send(Message::Text(text.into())).is_err() {
                                break;
                            }
                        }
                    }
                }));
            }
        }
        opcode::READY => {
            if let Ok(ready) = serde_json::from_value::<ReadyPayload>(envelope.d) {
                *inner.ready.lock().unwrap() = Some(ready);
                *inner.state.lock().unwrap() = ConnectionState::ReadyReceived;
                inner.ready_notify.notify_waiters();
            }
        }
        opcode::SELECT_PROTOCOL_ACK => {
            if let Ok(ack) = serde_json::from_value::<SelectProtocolAckPayload>(envelope.d) {
                *inner.protocol_ack.lock().unwrap() = Some(ack);
                *inner.state.lock().unwrap() = ConnectionState::Operational;
                inner.ack_notify.notify_waiters();
            }
        }
        opcode::RESUMED => {
            *inner.state.lock().unwrap() = ConnectionState::Operational;
            inner.session.lock().unwrap().resuming = false;
            inner.resumed_notify.notify_waiters();
        }
        opcode::HEARTBEAT_ACK => {}
        other => {
            log::debug!("unhandled voice gateway opcode {other}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_code_4015_and_sub_4000_codes_are_resumable() {
        assert!(is_resumable_close_code(Some(4015)));
        assert!(is_resumable_close_code(Some(1006)));
        assert!(is_resumable_close_code(Some(3999)));
    }

    #[test]
    fn close_codes_4000_and_above_other_than_4015_are_terminal() {
        assert!(!is_resumable_close_code(Some(4000)));
        assert!(!is_resumable_close_code(Some(4006)));
        assert!(!is_resumable_close_code(Some(4014)));
        assert!(!is_resumable_close_code(Some(4016)));
    }

    #[test]
    fn a_missing_close_code_is_treated_as_terminal() {
        assert!(!is_resumable_close_code(None));
    }

    fn test_connection() -> VoiceGatewayConnection {
        let session = SessionInfo::new("guild", "channel", "user");
        VoiceGatewayConnection::new(session, false)
    }

    #[tokio::test]
    async fn hello_drives_the_state_to_identified_and_starts_heartbeating() {
        let conn = test_connection();
        let (outbound, _rx) = mpsc::unbounded_channel();
        let mut heartbeat = None;
        let text = serde_json::json!({"op": opcode::HELLO, "d": {"heartbeat_interval": 5}}).to_string();

        handle_inbound(&conn.inner, &text, &outbound, &mut heartbeat);

        assert_eq!(conn.state(), ConnectionState::Identified);
        assert!(heartbeat.is_some());
        heartbeat.unwrap().abort();
    }

    #[tokio::test]
    async fn ready_records_the_payload_and_unblocks_wait_ready() {
        let conn = test_connection();
        let (outbound, _rx) = mpsc::unbounded_channel();
        let mut heartbeat = None;
        let text = serde_json::json!({
            "op": opcode::READY,
            "d": {
                "ssrc": 1234,
                "ip": "127.0.0.1",
                "port": 5555,
                "modes": ["aead_aes256_gcm_rtpsize"],
            },
        })
        .to_string();

        handle_inbound(&conn.inner, &text, &outbound, &mut heartbeat);

        assert_eq!(conn.state(), ConnectionState::ReadyReceived);
        assert_eq!(conn.ready_info().unwrap().ssrc, 1234);
    }

    #[tokio::test]
    async fn select_protocol_ack_drives_the_state_to_operational() {
        let conn = test_connection();
        let (outbound, _rx) = mpsc::unbounded_channel();
        let mut heartbeat = None;
        let text = serde_json::json!({
            "op": opcode::SELECT_PROTOCOL_ACK,
            "d": {"mode": "aead_aes256_gcm_rtpsize", "secret_key": [0u8; 32]},
        })
        .to_string();

        handle_inbound(&conn.inner, &text, &outbound, &mut heartbeat);

        assert_eq!(conn.state(), ConnectionState::Operational);
    }

    #[tokio::test]
    async fn resumed_clears_the_resuming_flag_and_returns_to_operational() {
        let conn = test_connection();
        conn.inner.session.lock().unwrap().resuming = true;
        *conn.inner.state.lock().unwrap() = ConnectionState::Resuming;
        let (outbound, _rx) = mpsc::unbounded_channel();
        let mut heartbeat = None;

        handle_inbound(&conn.inner, "{\"op\":9,\"d\":null}", &outbound, &mut heartbeat);

        assert_eq!(conn.state(), ConnectionState::Operational);
        assert!(!conn.inner.session.lock().unwrap().resuming);
    }

    #[tokio::test]
    async fn malformed_frames_are_ignored_without_panicking() {
        let conn = test_connection();
        let (outbound, _rx) = mpsc::unbounded_channel();
        let mut heartbeat = None;

        handle_inbound(&conn.inner, "not json", &outbound, &mut heartbeat);

        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }
}
