//! RTCP Sender Report, SRTP-protected (spec §4.3).

use byteorder::{BigEndian, ByteOrder};
use std::time::{SystemTime, UNIX_EPOCH};

use voice_crypto::Aead;

use crate::error::Result;

const RTCP_HEADER_LEN: usize = 8;
const SR_BODY_LEN: usize = 20;
const RTCP_SR_PACKET_TYPE: u8 = 0xC8;
const RTCP_SR_LENGTH_FIELD: u16 = 0x0006;

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch.
const NTP_UNIX_EPOCH_OFFSET: u64 = 2_208_988_800;

/// Converts a wall-clock instant into a 32.32 fixed-point NTP timestamp:
/// MSW = whole seconds since 1900-01-01 UTC, LSW = round(fraction * 2^32).
pub fn ntp_timestamp(now: SystemTime) -> (u32, u32) {
    let since_unix = now
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs = since_unix.as_secs() + NTP_UNIX_EPOCH_OFFSET;
    let msw = secs as u32;
    let frac = since_unix.subsec_nanos() as f64 / 1_000_000_000.0;
    let lsw = (frac * (u32::MAX as f64 + 1.0)).round() as u32;
    (msw, lsw)
}

/// Builds an SRTP-protected RTCP Sender Report for the given stream's current
/// counters and `wall_time`. The 8-byte RTCP header is sent in the clear and
/// used as AEAD associated data; the 20-byte body is encrypted and the
/// 4-byte truncated nonce is appended.
pub fn build_sender_report(
    ssrc: u32,
    rtp_timestamp: u32,
    total_packets: u32,
    total_bytes: u32,
    wall_time: SystemTime,
    aead: &Aead,
) -> Result<Vec<u8>> {
    let mut header = [0u8; RTCP_HEADER_LEN];
    header[0] = 0x80;
    header[1] = RTCP_SR_PACKET_TYPE;
    BigEndian::write_u16(&mut header[2..4], RTCP_SR_LENGTH_FIELD);
    BigEndian::write_u32(&mut header[4..8], ssrc);

    let (ntp_msw, ntp_lsw) = ntp_timestamp(wall_time);
    let mut body = [0u8; SR_BODY_LEN];
    BigEndian::write_u32(&mut body[0..4], ntp_msw);
    BigEndian::write_u32(&mut body[4..8], ntp_lsw);
    BigEndian::write_u32(&mut body[8..12], rtp_timestamp);
    BigEndian::write_u32(&mut body[12..16], total_packets);
    BigEndian::write_u32(&mut body[16..20], total_bytes);

    let (ciphertext, nonce_lo) = aead.encrypt(&body, &header)?;

    let mut packet = Vec::with_capacity(RTCP_HEADER_LEN + ciphertext.len() + 4);
    packet.extend_from_slice(&header);
    packet.extend_from_slice(&ciphertext);
    packet.extend_from_slice(&nonce_lo);
    Ok(packet)
}

/// Default SR interval in packets for 20ms Opus frames (~5s, spec §4.3/§9.2).
pub fn default_audio_sr_interval(frametime_ms: u32) -> u32 {
    if frametime_ms == 0 {
        return 250;
    }
    // ~5s / frametime, scaled from the 20ms-frame baseline of 250 packets.
    (250 * 20 / frametime_ms).max(1)
}

/// Default SR interval in packets for video (~5s at ~3 packets/frame, spec
/// §4.3).
pub fn default_video_sr_interval(fps: u32) -> u32 {
    (5 * fps.max(1) * 3).max(1)
}
