//! `StreamingController`: joins voice, negotiates camera and/or Go-Live
//! media sessions, and wires their packetizers to pacing streams and the
//! UDP transport (spec §4.6).

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use voice_crypto::{Aead, AeadKind, NonceCounter};
use voice_gateway::{ReadyPayload, SessionInfo, VoiceGatewayConnection};
use voice_net::UdpTransport;
use voice_pacing::PacingStream;
use voice_rtp::codec::h26x::{H26xPayloader, H26xProfile, ParameterSets};
use voice_rtp::codec::opus::OpusPayloader;
use voice_rtp::codec::vp8::Vp8Payloader;
use voice_rtp::{header, rtcp, EncodedPacket, Packetizer, RtpPacketizer, RtpStreamState, SendOutput};

use crate::error::{Result, VoiceError};
use crate::options::{StreamOptions, VideoCodec};
use crate::signaling::{self, InboundEvent, OutboundEvent, SignalingSink};

/// Pair-sync tolerance between the audio and video pacing streams
/// (spec §3 `PacingClock.syncTolerance` default).
const SYNC_TOLERANCE_MS: f64 = 5.0;

/// Brief settle after teardown so in-flight writes drain before the UDP
/// socket is released (spec §5).
const TEARDOWN_SETTLE: Duration = Duration::from_millis(50);

#[derive(Clone)]
struct StreamHandles {
    pacing: Arc<PacingStream>,
}

/// Everything learned from one `set_protocols` negotiation: the connected
/// UDP transport, the peer's `READY` payload, and the chosen AEAD.
struct Negotiated {
    udp: Arc<UdpTransport>,
    ready: ReadyPayload,
    aead_kind: AeadKind,
    key: Vec<u8>,
}

async fn negotiate(gateway: &VoiceGatewayConnection) -> Result<Negotiated> {
    let ready = gateway.wait_ready().await;
    let peer_ip: Ipv4Addr = ready.ip.parse().map_err(|_| {
        VoiceError::Config(format!("READY ip {:?} is not a valid IPv4 literal", ready.ip))
    })?;
    let udp = Arc::new(UdpTransport::connect(SocketAddr::new(peer_ip.into(), ready.port)).await?);
    let discovered = udp.discover_ip(ready.ssrc).await?;
    let peer_supports_aes_gcm = ready
        .modes
        .iter()
        .any(|m| m == AeadKind::Aes256Gcm.mode_name());
    let ack = gateway
        .set_protocols(discovered.ip.to_string(), discovered.port, peer_supports_aes_gcm)
        .await?;
    let aead_kind = if ack.mode == AeadKind::Aes256Gcm.mode_name() {
        AeadKind::Aes256Gcm
    } else {
        AeadKind::XChaCha20Poly1305
    };
    Ok(Negotiated {
        udp,
        ready,
        aead_kind,
        key: ack.secret_key,
    })
}

fn spawn_udp_writer(udp: Arc<UdpTransport>, mut output: mpsc::UnboundedReceiver<SendOutput>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(send_output) = output.recv().await {
            for packet in &send_output.rtp_packets {
                if let Err(err) = udp.send(packet).await {
                    log::warn!("voice-session: RTP send failed: {err}");
                }
            }
            if let Some(sr) = &send_output.sender_report {
                if let Err(err) = udp.send(sr).await {
                    log::warn!("voice-session: RTCP SR send failed: {err}");
                }
            }
        }
    })
}

fn build_audio_packetizer(ssrc: u32, aead: Aead, sr_enabled: bool) -> Packetizer {
    let sr_interval = rtcp::default_audio_sr_interval(StreamOptions::AUDIO_FRAMETIME_MS);
    let state = RtpStreamState::new(ssrc, header::payload_type::OPUS, sr_interval);
    Packetizer::Opus(RtpPacketizer::new(state, aead, OpusPayloader, sr_enabled))
}

fn build_video_packetizer(
    codec: VideoCodec,
    ssrc: u32,
    aead: Aead,
    sr_enabled: bool,
    fps: u32,
    parameter_sets: ParameterSets,
) -> Result<Packetizer> {
    if !codec.has_payloader() {
        return Err(VoiceError::Config(format!(
            "{} has no RTP payloader in this build",
            codec.catalog_name()
        )));
    }
    let sr_interval = rtcp::default_video_sr_interval(fps);
    let packetizer = match codec {
        VideoCodec::H264 => {
            let state = RtpStreamState::new(ssrc, header::payload_type::H264, sr_interval);
            Packetizer::H264(RtpPacketizer::new(
                state,
                aead,
                H26xPayloader::new(H26xProfile::H264, parameter_sets),
                sr_enabled,
            ))
        }
        VideoCodec::H265 => {
            let state = RtpStreamState::new(ssrc, header::payload_type::H265, sr_interval);
            Packetizer::H265(RtpPacketizer::new(
                state,
                aead,
                H26xPayloader::new(H26xProfile::H265, parameter_sets),
                sr_enabled,
            ))
        }
        VideoCodec::Vp8 => {
            let state = RtpStreamState::new(ssrc, header::payload_type::VP8, sr_interval);
            Packetizer::Vp8(RtpPacketizer::new(state, aead, Vp8Payloader::new(), sr_enabled))
        }
        VideoCodec::Vp9 | VideoCodec::Av1 => unreachable!("has_payloader checked above"),
    };
    Ok(packetizer)
}

/// Orchestrates one user's voice session: the camera-mode control
/// connection plus UDP transport, and an optional Go-Live sub-session with
/// its own control connection and UDP transport keyed by
/// [`signaling::stream_key`] (spec §4.6).
///
/// Audio always flows over the primary voice connection. Camera video reuses
/// the same UDP transport and AEAD key (via a shared [`NonceCounter`]);
/// Go-Live video opens a second control session and UDP transport with its
/// own key, and pair-syncs against the audio pacing stream regardless.
pub struct StreamingController {
    options: StreamOptions,
    guild_id: String,
    channel_id: String,
    local_user_id: String,
    signaling: Arc<dyn SignalingSink>,

    voice: VoiceGatewayConnection,
    session_id: StdMutex<Option<String>>,

    voice_udp: StdMutex<Option<Arc<UdpTransport>>>,
    voice_crypto: StdMutex<Option<(AeadKind, Vec<u8>, NonceCounter)>>,
    voice_ready: StdMutex<Option<ReadyPayload>>,

    go_live: StdMutex<Option<(VoiceGatewayConnection, String)>>,
    go_live_udp: StdMutex<Option<Arc<UdpTransport>>>,

    audio: StdMutex<Option<StreamHandles>>,
    video: StdMutex<Option<StreamHandles>>,

    pending_stream_server_ids: StdMutex<HashMap<String, String>>,
    stream_event_notify: Notify,

    writer_handles: StdMutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl StreamingController {
    pub fn new(
        options: StreamOptions,
        guild_id: impl Into<String>,
        channel_id: impl Into<String>,
        local_user_id: impl Into<String>,
        signaling: Arc<dyn SignalingSink>,
    ) -> Self {
        let guild_id = guild_id.into();
        let channel_id = channel_id.into();
        let local_user_id = local_user_id.into();
        let session = SessionInfo::new(guild_id.clone(), channel_id.clone(), local_user_id.clone());
        let voice = VoiceGatewayConnection::new(session, options.force_chacha20_encryption);

        Self {
            options,
            guild_id,
            channel_id,
            local_user_id,
            signaling,
            voice,
            session_id: StdMutex::new(None),
            voice_udp: StdMutex::new(None),
            voice_crypto: StdMutex::new(None),
            voice_ready: StdMutex::new(None),
            go_live: StdMutex::new(None),
            go_live_udp: StdMutex::new(None),
            audio: StdMutex::new(None),
            video: StdMutex::new(None),
            pending_stream_server_ids: StdMutex::new(HashMap::new()),
            stream_event_notify: Notify::new(),
            writer_handles: StdMutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Dispatches an inbound signaling event to whichever control connection
    /// it belongs to (spec §6 "in-bound").
    pub fn handle_inbound_event(&self, event: InboundEvent) {
        match event {
            InboundEvent::VoiceStateUpdate { user_id, session_id } => {
                if user_id == self.local_user_id {
                    *self.session_id.lock().unwrap() = Some(session_id.clone());
                    self.voice.set_session(session_id);
                }
            }
            InboundEvent::VoiceServerUpdate { guild_id, endpoint, token } => {
                if guild_id == self.guild_id {
                    self.voice.set_tokens(endpoint, token);
                }
            }
            InboundEvent::StreamCreate { stream_key, rtc_server_id } => {
                self.pending_stream_server_ids
                    .lock()
                    .unwrap()
                    .insert(stream_key, rtc_server_id);
                self.stream_event_notify.notify_waiters();
            }
            InboundEvent::StreamServerUpdate { stream_key, endpoint, token } => {
                if let Some((conn, key)) = self.go_live.lock().unwrap().clone() {
                    if key == stream_key {
                        conn.set_tokens(endpoint, token);
                    }
                }
            }
        }
    }

    /// Sends `VOICE_STATE_UPDATE` to join the channel (spec §4.6 step 1).
    /// Does not block: call [`Self::start_audio`] once `handle_inbound_event`
    /// has delivered the session id and voice-server token.
    pub fn join_voice(&self) {
        self.signaling.send(OutboundEvent::join(
            self.guild_id.clone(),
            self.channel_id.clone(),
            self.options.video_codec.has_payloader(),
        ));
    }

    /// Negotiates the primary voice connection and starts the audio pacing
    /// stream. Returns the channel the embedder feeds encoded Opus frames
    /// into.
    pub async fn start_audio(&self) -> Result<mpsc::Sender<EncodedPacket>> {
        let negotiated = negotiate(&self.voice).await?;
        let aead = Aead::new(negotiated.aead_kind, &negotiated.key)?;
        let counter = aead.shared_counter();
        let packetizer = build_audio_packetizer(negotiated.ready.ssrc, aead, self.options.rtcp_sr_enabled);

        let (stream, input, output) =
            PacingStream::spawn(packetizer, StreamOptions::AUDIO_FRAMETIME_MS, SYNC_TOLERANCE_MS, false);
        let writer = spawn_udp_writer(negotiated.udp.clone(), output);
        self.writer_handles.lock().unwrap().push(writer);
        self.writer_handles
            .lock()
            .unwrap()
            .push(negotiated.udp.clone().spawn_discard_loop());

        self.voice.set_speaking(true, negotiated.ready.ssrc)?;

        *self.voice_udp.lock().unwrap() = Some(negotiated.udp);
        *self.voice_crypto.lock().unwrap() = Some((negotiated.aead_kind, negotiated.key, counter));
        *self.voice_ready.lock().unwrap() = Some(negotiated.ready);
        *self.audio.lock().unwrap() = Some(StreamHandles { pacing: stream });

        Ok(input)
    }

    /// Starts the camera-mode video pacing stream over the already
    /// negotiated voice UDP transport (spec §4.6 "Camera mode reuses the
    /// voice UDP"). [`Self::start_audio`] must have completed first.
    pub async fn start_camera_video(&self, parameter_sets: ParameterSets) -> Result<mpsc::Sender<EncodedPacket>> {
        let (kind, key, counter) = self
            .voice_crypto
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| VoiceError::ProtocolState("start_audio must run before start_camera_video".into()))?;
        let ready = self
            .voice_ready
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| VoiceError::ProtocolState("voice session is not ready".into()))?;
        let udp = self
            .voice_udp
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| VoiceError::ProtocolState("voice UDP transport is not established".into()))?;
        let video_ssrc = ready
            .video_ssrc
            .ok_or_else(|| VoiceError::Config("READY carried no video SSRC".into()))?;

        let aead = Aead::with_counter(kind, &key, counter)?;
        let packetizer = build_video_packetizer(
            self.options.video_codec,
            video_ssrc,
            aead,
            self.options.rtcp_sr_enabled,
            self.options.fps,
            parameter_sets,
        )?;

        // Video always gets a sync peer via `cross_sync` below, so its own
        // pacing sleep is redundant with `wait_for_sync` (spec §4.4 step 7).
        let (stream, input, output) =
            PacingStream::spawn(packetizer, self.options.video_frametime_ms(), SYNC_TOLERANCE_MS, true);
        let writer = spawn_udp_writer(udp, output);
        self.writer_handles.lock().unwrap().push(writer);
        self.cross_sync(&stream);

        self.voice.set_video_status(
            ready.ssrc,
            Some((
                video_ssrc,
                ready.rtx_ssrc.unwrap_or(0),
                self.options.max_bitrate_kbps,
                self.options.fps,
                self.options.width,
                self.options.height,
            )),
        )?;

        *self.video.lock().unwrap() = Some(StreamHandles { pacing: stream });
        Ok(input)
    }

    /// Opens a Go-Live sub-session keyed by `guild:channel:user`: a second
    /// control connection and a second UDP transport, negotiated
    /// independently of the voice connection (spec §4.6 "Go-Live mode opens
    /// a second control session"). Its video pacing stream pair-syncs against
    /// the voice connection's audio stream if one is running.
    pub async fn start_go_live(&self, parameter_sets: ParameterSets) -> Result<mpsc::Sender<EncodedPacket>> {
        let key = signaling::stream_key(&self.guild_id, &self.channel_id, &self.local_user_id);
        self.signaling.send(OutboundEvent::StreamCreate {
            guild_id: self.guild_id.clone(),
            channel_id: self.channel_id.clone(),
            preferred_region: None,
        });

        let rtc_server_id = self.wait_for_stream_server_id(&key).await;

        let mut session = SessionInfo::new(rtc_server_id, self.channel_id.clone(), self.local_user_id.clone());
        if let Some(session_id) = self.session_id.lock().unwrap().clone() {
            session.set_session(session_id);
        }
        let conn = VoiceGatewayConnection::new(session, self.options.force_chacha20_encryption);
        *self.go_live.lock().unwrap() = Some((conn.clone(), key.clone()));

        self.signaling.send(OutboundEvent::StreamSetPaused {
            stream_key: key,
            paused: false,
        });

        let negotiated = negotiate(&conn).await?;
        let aead = Aead::new(negotiated.aead_kind, &negotiated.key)?;
        let video_ssrc = negotiated.ready.video_ssrc.unwrap_or(negotiated.ready.ssrc);
        let packetizer = build_video_packetizer(
            self.options.video_codec,
            video_ssrc,
            aead,
            self.options.rtcp_sr_enabled,
            self.options.fps,
            parameter_sets,
        )?;

        let (stream, input, output) =
            PacingStream::spawn(packetizer, self.options.video_frametime_ms(), SYNC_TOLERANCE_MS, true);
        let writer = spawn_udp_writer(negotiated.udp.clone(), output);
        self.writer_handles.lock().unwrap().push(writer);
        self.writer_handles
            .lock()
            .unwrap()
            .push(negotiated.udp.clone().spawn_discard_loop());
        self.cross_sync(&stream);

        *self.go_live_udp.lock().unwrap() = Some(negotiated.udp);
        *self.video.lock().unwrap() = Some(StreamHandles { pacing: stream });
        Ok(input)
    }

    /// Pair-syncs a freshly spawned video stream against the running audio
    /// stream in both directions (spec §4.4 "Pair-sync").
    fn cross_sync(&self, video: &Arc<PacingStream>) {
        if let Some(audio) = self.audio.lock().unwrap().clone() {
            audio.pacing.set_sync_peer(Arc::downgrade(video));
            video.set_sync_peer(Arc::downgrade(&audio.pacing));
        }
    }

    async fn wait_for_stream_server_id(&self, key: &str) -> String {
        loop {
            if let Some(id) = self.pending_stream_server_ids.lock().unwrap().get(key).cloned() {
                return id;
            }
            self.stream_event_notify.notified().await;
        }
    }

    /// Pauses every running pacing stream (spec §4.6 `pause()`).
    pub async fn pause(&self) {
        let audio = self.audio.lock().unwrap().clone();
        let video = self.video.lock().unwrap().clone();
        if let Some(a) = audio {
            a.pacing.pause().await;
        }
        if let Some(v) = video {
            v.pacing.pause().await;
        }
    }

    /// Resumes every paused pacing stream (spec §4.6 `resume()`).
    pub async fn resume(&self) {
        let audio = self.audio.lock().unwrap().clone();
        let video = self.video.lock().unwrap().clone();
        if let Some(a) = audio {
            a.pacing.resume().await;
        }
        if let Some(v) = video {
            v.pacing.resume().await;
        }
    }

    /// Idempotent teardown: detaches pacing streams, clears speaking/video
    /// status, closes every control connection and releases both UDP
    /// transports (spec §4.6 `stop()`).
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let audio = self.audio.lock().unwrap().take();
        let video = self.video.lock().unwrap().take();
        if let Some(a) = &audio {
            a.pacing.stop();
        }
        if let Some(v) = &video {
            v.pacing.stop();
        }

        let voice_ssrc = self.voice_ready.lock().unwrap().as_ref().map(|r| r.ssrc).unwrap_or(0);
        let _ = self.voice.set_speaking(false, voice_ssrc);
        let _ = self.voice.set_video_status(voice_ssrc, None);
        self.voice.stop();

        if let Some((conn, key)) = self.go_live.lock().unwrap().take() {
            self.signaling.send(OutboundEvent::StreamDelete { stream_key: key });
            conn.stop();
        }

        for handle in self.writer_handles.lock().unwrap().drain(..) {
            handle.abort();
        }

        *self.voice_udp.lock().unwrap() = None;
        *self.go_live_udp.lock().unwrap() = None;

        tokio::time::sleep(TEARDOWN_SETTLE).await;
    }

    /// Classifies an external encoder's exit, for the embedder to surface
    /// through its own error channel (spec §7 "Encoder").
    pub fn report_encoder_exit(&self, exit_code: Option<i32>, signal: Option<i32>) -> Option<VoiceError> {
        crate::error::encoder_exit_error(exit_code, signal)
    }

    /// Awaits the first terminal error from the voice connection, the
    /// Go-Live connection, or either pacing stream, tears the session down,
    /// and returns it as a single event (spec §7: "surfaced on the
    /// controller as a single `error` event and terminate the session").
    /// Resumable control closes are handled transparently inside
    /// `voice-gateway` and never resolve this call.
    pub async fn wait_error(&self) -> VoiceError {
        let go_live_conn = self.go_live.lock().unwrap().clone().map(|(conn, _)| conn);
        let audio_pacing = self.audio.lock().unwrap().clone().map(|h| h.pacing);
        let video_pacing = self.video.lock().unwrap().clone().map(|h| h.pacing);

        let err = tokio::select! {
            err = self.voice.wait_closed() => VoiceError::from(err),
            err = wait_gateway_closed(&go_live_conn) => VoiceError::from(err),
            err = wait_pacing_error(&audio_pacing) => VoiceError::Codec(err),
            err = wait_pacing_error(&video_pacing) => VoiceError::Codec(err),
        };

        self.stop().await;
        err
    }
}

async fn wait_gateway_closed(conn: &Option<VoiceGatewayConnection>) -> voice_gateway::Error {
    match conn {
        Some(conn) => conn.wait_closed().await,
        None => std::future::pending().await,
    }
}

async fn wait_pacing_error(stream: &Option<Arc<PacingStream>>) -> voice_rtp::Error {
    match stream {
        Some(stream) => stream.wait_error().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdSyncMutex;

    struct RecordingSink {
        sent: StdSyncMutex<Vec<OutboundEvent>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                sent: StdSyncMutex::new(Vec::new()),
            }
        }
    }

    impl SignalingSink for RecordingSink {
        fn send(&self, event: OutboundEvent) {
            self.sent.lock().unwrap().push(event);
        }
    }

    fn controller(sink: Arc<RecordingSink>) -> StreamingController {
        StreamingController::new(StreamOptions::default(), "g", "c", "me", sink)
    }

    #[test]
    fn join_voice_sends_a_voice_state_update() {
        let sink = Arc::new(RecordingSink::new());
        let controller = controller(sink.clone());
        controller.join_voice();
        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0], OutboundEvent::VoiceStateUpdate { .. }));
    }

    #[test]
    fn stream_create_event_unblocks_the_go_live_wait() {
        let sink = Arc::new(RecordingSink::new());
        let controller = controller(sink);
        let key = signaling::stream_key("g", "c", "me");
        controller.handle_inbound_event(InboundEvent::StreamCreate {
            stream_key: key.clone(),
            rtc_server_id: "server-1".to_string(),
        });
        assert_eq!(
            controller.pending_stream_server_ids.lock().unwrap().get(&key),
            Some(&"server-1".to_string())
        );
    }

    #[test]
    fn unsupported_video_codec_is_rejected_before_any_io() {
        let err = build_video_packetizer(
            VideoCodec::Av1,
            1,
            Aead::new(AeadKind::Aes256Gcm, &[0u8; 32]).unwrap(),
            true,
            30,
            ParameterSets::default(),
        )
        .unwrap_err();
        assert!(matches!(err, VoiceError::Config(_)));
    }

    #[tokio::test]
    async fn stop_before_start_is_a_no_op_and_idempotent() {
        let sink = Arc::new(RecordingSink::new());
        let controller = controller(sink);
        controller.stop().await;
        controller.stop().await;
    }

    #[test]
    fn voice_state_update_for_another_user_is_ignored() {
        let sink = Arc::new(RecordingSink::new());
        let controller = controller(sink);
        controller.handle_inbound_event(InboundEvent::VoiceStateUpdate {
            user_id: "someone-else".to_string(),
            session_id: "sess".to_string(),
        });
        assert!(controller.session_id.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn a_packetizer_error_on_the_audio_stream_surfaces_through_wait_error() {
        let sink = Arc::new(RecordingSink::new());
        let controller = controller(sink);

        let aead = Aead::new(AeadKind::Aes256Gcm, &[0u8; 32]).unwrap();
        let packetizer = build_audio_packetizer(1, aead, false);
        let (stream, input, _output) = PacingStream::spawn(packetizer, StreamOptions::AUDIO_FRAMETIME_MS, 5.0, false);
        *controller.audio.lock().unwrap() = Some(StreamHandles { pacing: stream });

        // An Opus payloader rejects an empty access unit (spec §4.3).
        input
            .send(EncodedPacket {
                codec: voice_rtp::Codec::Opus,
                payload: vec![],
                pts_hi: 0,
                pts_lo: 0,
                time_base_num: 1,
                time_base_den: 48_000,
                duration: 960,
                flags: voice_rtp::PacketFlags::default(),
            })
            .await
            .unwrap();

        let err = controller.wait_error().await;
        assert!(matches!(err, VoiceError::Codec(voice_rtp::Error::EmptyAccessUnit)));
    }
}
