//! Opus payloader: one access unit is one RTP payload, no fragmentation and
//! no header extension (spec §4.3, §9.3).

use crate::codec::{CodecPayloader, PayloadChunk};
use crate::error::{Error, Result};
use crate::header::payload_type;
use crate::packet::EncodedPacket;

const OPUS_CLOCK_RATE: u32 = 48_000;

#[derive(Debug, Default)]
pub struct OpusPayloader;

impl CodecPayloader for OpusPayloader {
    fn clock_rate(&self) -> u32 {
        OPUS_CLOCK_RATE
    }

    fn payload_type(&self) -> u8 {
        payload_type::OPUS
    }

    fn uses_header_extension(&self) -> bool {
        false
    }

    fn frame_to_payloads(&mut self, packet: &EncodedPacket, _mtu: usize) -> Result<Vec<PayloadChunk>> {
        if packet.payload.is_empty() {
            return Err(Error::EmptyAccessUnit);
        }
        Ok(vec![PayloadChunk {
            bytes: packet.payload.clone(),
            marker: true,
        }])
    }
}
