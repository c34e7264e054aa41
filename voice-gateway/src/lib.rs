#![warn(rust_2018_idioms)]
#![allow(dead_code)]

//! Discord voice-gateway v7 control WebSocket client (spec §4.5).
//!
//! Owns IDENTIFY/RESUME, heartbeating, SELECT_PROTOCOL negotiation, and
//! SPEAKING/VIDEO status on one control connection. Carries no UDP/RTP code
//! of its own; callers drive [`connection::VoiceGatewayConnection::wait_ready`]
//! and [`connection::VoiceGatewayConnection::set_protocols`] to hand the
//! discovered address off to `voice-net`/`voice-rtp`.

pub mod connection;
pub mod error;
pub mod messages;
pub mod opcode;
pub mod state;

pub use connection::VoiceGatewayConnection;
pub use error::{Error, Result};
pub use messages::{
    CodecDescription, Envelope, HelloPayload, IdentifyPayload, ReadyPayload, ResumePayload,
    SelectProtocolAckPayload, SelectProtocolData, SelectProtocolPayload, SpeakingPayload,
    VideoPayload, VideoResolution, VideoSimulcastLayer,
};
pub use state::{ConnectionState, SessionInfo};
