//! The narrow interface to the host's control-plane signaling bus (spec §6).
//!
//! Only message semantics matter here, not the carrier (spec §1): the host
//! owns the actual gateway websocket/REST transport and hands us
//! [`InboundEvent`]s as it observes them, and we hand it [`OutboundEvent`]s to
//! serialize and send however its transport requires.

use serde::Serialize;

/// Events the host observes on its signaling transport and forwards to a
/// [`crate::controller::StreamingController`] (spec §6 "in-bound").
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// Sets the session id when `user_id` matches the local user.
    VoiceStateUpdate { user_id: String, session_id: String },
    /// Sets the server endpoint/token when `guild_id` matches the active join.
    VoiceServerUpdate {
        guild_id: String,
        endpoint: String,
        token: String,
    },
    /// Go-Live sub-session creation; `stream_key` is `guild:<guild_id>:<channel_id>:<user_id>`.
    StreamCreate {
        stream_key: String,
        rtc_server_id: String,
    },
    StreamServerUpdate {
        stream_key: String,
        endpoint: String,
        token: String,
    },
}

/// Events a [`crate::controller::StreamingController`] asks the host to send
/// on its signaling transport (spec §6 "out-bound" gateway opcodes).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OutboundEvent {
    #[serde(rename = "VOICE_STATE_UPDATE")]
    VoiceStateUpdate {
        guild_id: Option<String>,
        channel_id: Option<String>,
        self_mute: bool,
        self_deaf: bool,
        self_video: bool,
    },
    #[serde(rename = "STREAM_CREATE")]
    StreamCreate {
        guild_id: String,
        channel_id: String,
        preferred_region: Option<String>,
    },
    #[serde(rename = "STREAM_SET_PAUSED")]
    StreamSetPaused { stream_key: String, paused: bool },
    #[serde(rename = "STREAM_DELETE")]
    StreamDelete { stream_key: String },
}

impl OutboundEvent {
    /// Joins a voice channel, optionally announcing camera video.
    pub fn join(guild_id: impl Into<String>, channel_id: impl Into<String>, self_video: bool) -> Self {
        OutboundEvent::VoiceStateUpdate {
            guild_id: Some(guild_id.into()),
            channel_id: Some(channel_id.into()),
            self_mute: false,
            self_deaf: true,
            self_video,
        }
    }

    /// Leaves voice entirely (spec §6: null guild/channel, `self_mute:true`).
    pub fn leave() -> Self {
        OutboundEvent::VoiceStateUpdate {
            guild_id: None,
            channel_id: None,
            self_mute: true,
            self_deaf: false,
            self_video: false,
        }
    }
}

/// Builds the Go-Live stream key `guild:<guild_id>:<channel_id>:<user_id>`
/// (spec §6).
pub fn stream_key(guild_id: &str, channel_id: &str, user_id: &str) -> String {
    format!("guild:{guild_id}:{channel_id}:{user_id}")
}

/// Sends [`OutboundEvent`]s to the host's signaling transport. Implemented by
/// the embedder; this crate never opens a signaling connection itself
/// (spec §1 "out of scope: the control-plane signaling transport itself").
pub trait SignalingSink: Send + Sync {
    fn send(&self, event: OutboundEvent);
}
