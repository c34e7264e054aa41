//! Codec-specific RTP payloaders and the tagged-union `Packetizer` that
//! selects between them (spec §4.3, §9 "Dynamic dispatch over packetizers").

pub mod h26x;
pub mod opus;
pub mod vp8;

use std::time::SystemTime;

use voice_crypto::Aead;

use crate::error::Result;
use crate::header::{self, ExtensionElement};
use crate::packet::EncodedPacket;
use crate::rtcp;
use crate::stream_state::RtpStreamState;

/// One RTP payload ready to be wrapped in a header and encrypted.
#[derive(Debug, Clone)]
pub struct PayloadChunk {
    pub bytes: Vec<u8>,
    pub marker: bool,
}

/// What a `send_frame` call produced: the ordered RTP datagrams, and an
/// optional RTCP Sender Report datagram if an SR boundary was crossed.
#[derive(Debug, Clone, Default)]
pub struct SendOutput {
    pub rtp_packets: Vec<Vec<u8>>,
    pub sender_report: Option<Vec<u8>>,
}

/// Per-codec payload formatting, selected once per session from
/// `StreamOptions::video_codec` (or fixed to Opus for audio).
pub trait CodecPayloader {
    fn clock_rate(&self) -> u32;
    fn payload_type(&self) -> u8;
    /// Whether the one-byte RTP header extension (playout-delay) is emitted
    /// (true for every video codec, false for audio, spec §9.3).
    fn uses_header_extension(&self) -> bool;
    fn frame_to_payloads(&mut self, packet: &EncodedPacket, mtu: usize) -> Result<Vec<PayloadChunk>>;
}

/// The base packetizer contract shared by every codec (spec §4.3 steps 1-6):
/// assembles headers, encrypts with the header as AAD, advances counters,
/// and emits periodic RTCP Sender Reports.
pub struct RtpPacketizer<P: CodecPayloader> {
    state: RtpStreamState,
    aead: Aead,
    payloader: P,
    sr_enabled: bool,
}

impl<P: CodecPayloader> RtpPacketizer<P> {
    pub fn new(state: RtpStreamState, aead: Aead, payloader: P, sr_enabled: bool) -> Self {
        Self {
            state,
            aead,
            payloader,
            sr_enabled,
        }
    }

    pub fn state(&self) -> &RtpStreamState {
        &self.state
    }

    pub fn send_frame(
        &mut self,
        packet: &EncodedPacket,
        frametime_ms: u32,
        wall_time: SystemTime,
    ) -> Result<SendOutput> {
        let chunks = self.payloader.frame_to_payloads(packet, self.state.mtu)?;
        let extension = if self.payloader.uses_header_extension() {
            Some(ExtensionElement::playout_delay_zero())
        } else {
            None
        };

        let mut rtp_packets = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let seq = self.state.next_sequence_number();
            let rtp_header = header::build(
                self.payloader.payload_type(),
                chunk.marker,
                seq,
                self.state.timestamp(),
                self.state.ssrc,
                extension.as_ref(),
            );
            let (ciphertext, nonce_lo) = self.aead.encrypt(&chunk.bytes, &rtp_header)?;

            let mut datagram = rtp_header;
            datagram.extend_from_slice(&ciphertext);
            datagram.extend_from_slice(&nonce_lo);

            self.state.record_sent(chunk.bytes.len(), wall_time);
            rtp_packets.push(datagram);
        }

        let sender_report = if self.sr_enabled && self.state.sr_boundary_crossed() {
            Some(rtcp::build_sender_report(
                self.state.ssrc,
                self.state.timestamp(),
                self.state.total_packets(),
                self.state.total_bytes(),
                wall_time,
                &self.aead,
            )?)
        } else {
            None
        };

        self.state
            .advance_timestamp(frametime_ms, self.payloader.clock_rate());

        Ok(SendOutput {
            rtp_packets,
            sender_report,
        })
    }
}

/// Tagged union over the five codecs the control plane can negotiate
/// (spec §9's "Dynamic dispatch over packetizers" redesign note). Only
/// Opus/H.264/H.265/VP8 ship a payloader; VP9/AV1 are catalog-only entries
/// (see SPEC_FULL.md §3) and are rejected at construction time.
pub enum Packetizer {
    Opus(RtpPacketizer<opus::OpusPayloader>),
    H264(RtpPacketizer<h26x::H26xPayloader>),
    H265(RtpPacketizer<h26x::H26xPayloader>),
    Vp8(RtpPacketizer<vp8::Vp8Payloader>),
}

impl Packetizer {
    pub fn send_frame(
        &mut self,
        packet: &EncodedPacket,
        frametime_ms: u32,
        wall_time: SystemTime,
    ) -> Result<SendOutput> {
        match self {
            Packetizer::Opus(p) => p.send_frame(packet, frametime_ms, wall_time),
            Packetizer::H264(p) => p.send_frame(packet, frametime_ms, wall_time),
            Packetizer::H265(p) => p.send_frame(packet, frametime_ms, wall_time),
            Packetizer::Vp8(p) => p.send_frame(packet, frametime_ms, wall_time),
        }
    }

    pub fn ssrc(&self) -> u32 {
        match self {
            Packetizer::Opus(p) => p.state().ssrc,
            Packetizer::H264(p) => p.state().ssrc,
            Packetizer::H265(p) => p.state().ssrc,
            Packetizer::Vp8(p) => p.state().ssrc,
        }
    }
}
