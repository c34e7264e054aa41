//! `StreamOptions`, the only configuration surface this crate exposes
//! (spec §3, §6 "No CLI, no persisted state, no environment variables").

/// Video codec negotiated for a stream. Every variant is advertised in the
/// SELECT_PROTOCOL codec catalog (spec §6); only [`VideoCodec::H264`],
/// [`VideoCodec::H265`] and [`VideoCodec::Vp8`] ship a payload formatter
/// (spec §1 "Non-goals: support for codecs other than those listed").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    H265,
    Vp8,
    Vp9,
    Av1,
}

impl VideoCodec {
    /// Whether this crate ships an RTP payloader for the codec. VP9/AV1 are
    /// catalog-only entries carried for protocol completeness.
    pub fn has_payloader(self) -> bool {
        matches!(self, VideoCodec::H264 | VideoCodec::H265 | VideoCodec::Vp8)
    }

    /// The SELECT_PROTOCOL codec name advertised on the wire (spec §6).
    pub fn catalog_name(self) -> &'static str {
        match self {
            VideoCodec::H264 => "H264",
            VideoCodec::H265 => "H265",
            VideoCodec::Vp8 => "VP8",
            VideoCodec::Vp9 => "VP9",
            VideoCodec::Av1 => "AV1",
        }
    }
}

/// An x264/x265-style encoder preset name (e.g. `"ultrafast"`, `"veryfast"`).
/// Opaque to this crate: it is forwarded to the external encoder collaborator
/// (spec §1 "out of scope: the media demuxer/encoder"), never parsed here.
pub type H26xPreset = String;

/// Immutable stream configuration, set once by the embedder before
/// `setProtocols` succeeds (spec §3). Not read from env/files/CLI.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub avg_bitrate_kbps: u32,
    pub max_bitrate_kbps: u32,
    pub video_codec: VideoCodec,
    pub rtcp_sr_enabled: bool,
    pub force_chacha20_encryption: bool,
    pub minimize_latency: bool,
    pub h26x_preset: H26xPreset,
}

impl StreamOptions {
    /// The Opus frame duration this crate assumes (spec §8 scenario 2).
    pub const AUDIO_FRAMETIME_MS: u32 = 20;

    /// Milliseconds per video frame at the configured fps, used to advance
    /// the video RTP timestamp (spec §4.3).
    pub fn video_frametime_ms(&self) -> u32 {
        if self.fps == 0 {
            0
        } else {
            1000 / self.fps
        }
    }
}

impl Default for StreamOptions {
    fn default() -> Self {
        StreamOptions {
            width: 1280,
            height: 720,
            fps: 30,
            avg_bitrate_kbps: 2_500,
            max_bitrate_kbps: 5_000,
            video_codec: VideoCodec::H264,
            rtcp_sr_enabled: true,
            force_chacha20_encryption: false,
            minimize_latency: false,
            h26x_preset: "veryfast".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_frametime_matches_fps() {
        let mut opts = StreamOptions::default();
        opts.fps = 25;
        assert_eq!(opts.video_frametime_ms(), 40);
    }

    #[test]
    fn catalog_names_match_spec_six() {
        assert_eq!(VideoCodec::H264.catalog_name(), "H264");
        assert_eq!(VideoCodec::Vp9.catalog_name(), "VP9");
        assert!(!VideoCodec::Av1.has_payloader());
        assert!(VideoCodec::Vp8.has_payloader());
    }
}
