#![warn(rust_2018_idioms)]
#![allow(dead_code)]

//! Discord voice/Go-Live streaming controller (spec §4.6).
//!
//! Ties `voice-gateway` (control), `voice-net` (UDP + discovery), `voice-rtp`
//! (packetizers) and `voice-pacing` (real-time release) into one session:
//! join a voice channel, start camera and/or Go-Live video, pause/resume,
//! and tear down idempotently.

pub mod controller;
pub mod error;
pub mod options;
pub mod signaling;

pub use controller::StreamingController;
pub use error::{Result, VoiceError};
pub use options::{H26xPreset, StreamOptions, VideoCodec};
pub use signaling::{stream_key, InboundEvent, OutboundEvent, SignalingSink};
