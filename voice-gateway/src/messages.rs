//! Voice-gateway v7 JSON payload shapes (spec §4.5, §6).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The `{op, d}` envelope every voice-gateway frame uses, grounded on
/// `VoiceGatewaySendPayload`/`VoiceGatewayReceivePayload` in the pack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub op: u8,
    pub d: Value,
}

impl Envelope {
    pub fn new<T: Serialize>(op: u8, data: &T) -> serde_json::Result<Self> {
        Ok(Envelope {
            op,
            d: serde_json::to_value(data)?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IdentifyPayload {
    pub server_id: String,
    pub user_id: String,
    pub session_id: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectProtocolData {
    pub address: String,
    pub port: u16,
    pub mode: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CodecDescription {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub priority: u32,
    pub payload_type: u8,
    pub encode: bool,
    pub decode: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectProtocolPayload {
    pub protocol: &'static str,
    pub data: SelectProtocolData,
    pub codecs: Vec<CodecDescription>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadyPayload {
    pub ssrc: u32,
    pub ip: String,
    pub port: u16,
    pub modes: Vec<String>,
    #[serde(default)]
    pub video_ssrc: Option<u32>,
    #[serde(default)]
    pub rtx_ssrc: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelloPayload {
    pub heartbeat_interval: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectProtocolAckPayload {
    pub mode: String,
    pub secret_key: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpeakingPayload {
    pub speaking: u8,
    pub delay: u32,
    pub ssrc: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoResolution {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoSimulcastLayer {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub rid: &'static str,
    pub quality: u32,
    pub ssrc: u32,
    pub rtx_ssrc: u32,
    pub max_bitrate: u32,
    pub max_framerate: u32,
    pub max_resolution: VideoResolution,
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoPayload {
    pub audio_ssrc: u32,
    pub video_ssrc: u32,
    pub rtx_ssrc: u32,
    pub streams: Vec<VideoSimulcastLayer>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResumePayload {
    pub server_id: String,
    pub session_id: String,
    pub token: String,
}
