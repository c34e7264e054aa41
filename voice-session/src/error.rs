//! The §7 error-kind taxonomy, as surfaced by `StreamingController`.
//!
//! Propagation policy (spec §7): `ControlClose { resumable: true, .. }` is
//! handled locally (immediate reconnect, no surfaced error); every other
//! variant is surfaced on the controller as a single terminal error. Send-path
//! UDP errors are not modeled here — they are logged and returned to the
//! pacing stream, which keeps releasing subsequent frames (sparse packet loss
//! is acceptable, spec §7).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VoiceError>;

/// Unix `SIGKILL`, filtered out of `Encoder` error reporting because it is
/// the expected signal during teardown (spec §7).
pub const SIGKILL: i32 = 9;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum VoiceError {
    /// Unknown/unsupported codec, no voice connection before streaming, no
    /// video track in the demuxed input.
    #[error("configuration error: {0}")]
    Config(String),

    /// An operation was invoked before SSRC/keys/peer endpoint are known
    /// (e.g. `sendFrame` without an assigned SSRC).
    #[error("operation invoked before the session was ready: {0}")]
    ProtocolState(String),

    /// Malformed IP-discovery reply, or a socket error during discovery.
    #[error("UDP handshake failed: {0}")]
    Handshake(#[from] voice_net::Error),

    /// The control WebSocket closed. `resumable` distinguishes code 4015 (or
    /// any code below 4000 after reaching Identified) from every other code,
    /// which is terminal.
    #[error("voice control connection closed (code {code:?}, resumable={resumable})")]
    ControlClose { resumable: bool, code: Option<u16> },

    /// Key import failure or an authentication failure on any AEAD call;
    /// always fatal for the session.
    #[error("AEAD failure: {0}")]
    Aead(#[from] voice_crypto::Error),

    /// H.264/H.265 extradata not `configurationVersion` 1, or an unsupported
    /// codec in the demuxed input.
    #[error("codec error: {0}")]
    Codec(#[from] voice_rtp::Error),

    /// The external transcoder exited abnormally. `SIGKILL` during teardown
    /// is filtered before this variant is ever constructed — see
    /// [`encoder_exit_error`].
    #[error("encoder exited abnormally (exit_code={exit_code:?}, signal={signal:?})")]
    Encoder {
        exit_code: Option<i32>,
        signal: Option<i32>,
    },
}

impl From<voice_gateway::Error> for VoiceError {
    fn from(err: voice_gateway::Error) -> Self {
        match err {
            voice_gateway::Error::ControlClosedResumable(code) => {
                VoiceError::ControlClose { resumable: true, code }
            }
            voice_gateway::Error::ControlClosedTerminal(code) => {
                VoiceError::ControlClose { resumable: false, code }
            }
            other => VoiceError::ProtocolState(other.to_string()),
        }
    }
}

impl From<voice_pacing::Error> for VoiceError {
    fn from(err: voice_pacing::Error) -> Self {
        match err {
            voice_pacing::Error::Packetizer(inner) => VoiceError::Codec(inner),
            voice_pacing::Error::Terminated => {
                VoiceError::ProtocolState("pacing stream already terminated".to_string())
            }
        }
    }
}

impl VoiceError {
    pub fn is_resumable(&self) -> bool {
        matches!(self, VoiceError::ControlClose { resumable: true, .. })
    }
}

/// Classifies an external encoder's exit as the §7 `Encoder` error kind,
/// filtering `SIGKILL` since it is expected during `stop()` teardown.
/// Returns `None` for a clean exit or a `SIGKILL`-terminated one.
pub fn encoder_exit_error(exit_code: Option<i32>, signal: Option<i32>) -> Option<VoiceError> {
    if signal == Some(SIGKILL) {
        return None;
    }
    if signal.is_none() && exit_code == Some(0) {
        return None;
    }
    Some(VoiceError::Encoder { exit_code, signal })
}
