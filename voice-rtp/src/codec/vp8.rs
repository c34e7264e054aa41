//! VP8 payloader: RFC 7741 payload descriptor plus a 2-byte PictureID
//! extension, MTU-chunked across one or more RTP packets (spec §4.3).

use crate::codec::{CodecPayloader, PayloadChunk};
use crate::error::{Error, Result};
use crate::header::payload_type;
use crate::packet::EncodedPacket;

const VIDEO_CLOCK_RATE: u32 = 90_000;

/// `X=1, R=0, N=0, S=<first>, PartID=0` plus the extended-bits octet
/// `I=1` selecting a 2-byte PictureID.
const DESCRIPTOR_X_BIT: u8 = 0x80;
const DESCRIPTOR_S_BIT: u8 = 0x10;
const EXTENDED_PICTURE_ID_BIT: u8 = 0x80;
const PICTURE_ID_HIGH_BIT: u8 = 0x80;

pub struct Vp8Payloader {
    picture_id: u16,
}

impl Vp8Payloader {
    pub fn new() -> Self {
        Self { picture_id: 0 }
    }
}

impl Default for Vp8Payloader {
    fn default() -> Self {
        Self::new()
    }
}

impl CodecPayloader for Vp8Payloader {
    fn clock_rate(&self) -> u32 {
        VIDEO_CLOCK_RATE
    }

    fn payload_type(&self) -> u8 {
        payload_type::VP8
    }

    fn uses_header_extension(&self) -> bool {
        true
    }

    fn frame_to_payloads(&mut self, packet: &EncodedPacket, mtu: usize) -> Result<Vec<PayloadChunk>> {
        if packet.payload.is_empty() {
            return Err(Error::EmptyAccessUnit);
        }

        let picture_id = self.picture_id;
        self.picture_id = self.picture_id.wrapping_add(1);

        let descriptor_len = 4; // 2-byte base descriptor + 2-byte PictureID
        let chunk_size = mtu.saturating_sub(descriptor_len).max(1);

        let mut chunks = Vec::new();
        let mut offset = 0;
        let body = &packet.payload;
        loop {
            let end = (offset + chunk_size).min(body.len());
            let is_first = offset == 0;
            let is_last = end == body.len();

            let mut bytes = Vec::with_capacity(descriptor_len + (end - offset));
            bytes.push(DESCRIPTOR_X_BIT | if is_first { DESCRIPTOR_S_BIT } else { 0 });
            bytes.push(EXTENDED_PICTURE_ID_BIT);
            bytes.push(PICTURE_ID_HIGH_BIT | ((picture_id >> 8) as u8 & 0x7F));
            bytes.push((picture_id & 0xFF) as u8);
            bytes.extend_from_slice(&body[offset..end]);

            chunks.push(PayloadChunk {
                bytes,
                marker: is_last,
            });

            if is_last {
                break;
            }
            offset = end;
        }
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Codec, PacketFlags};

    fn frame(payload: Vec<u8>) -> EncodedPacket {
        EncodedPacket {
            codec: Codec::Vp8,
            payload,
            pts_hi: 0,
            pts_lo: 0,
            time_base_num: 1,
            time_base_den: 90_000,
            duration: 3000,
            flags: PacketFlags::default(),
        }
    }

    #[test]
    fn single_packet_frame_has_s_bit_and_marker() {
        let mut p = Vp8Payloader::new();
        let chunks = p.frame_to_payloads(&frame(vec![1, 2, 3]), 1200).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].bytes[0] & DESCRIPTOR_S_BIT, DESCRIPTOR_S_BIT);
        assert!(chunks[0].marker);
        assert_eq!(&chunks[0].bytes[4..], &[1, 2, 3]);
    }

    #[test]
    fn large_frame_splits_with_s_bit_only_on_first_chunk() {
        let mut p = Vp8Payloader::new();
        let payload: Vec<u8> = (0..20).collect();
        let chunks = p.frame_to_payloads(&frame(payload), 8).unwrap();
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].bytes[0] & DESCRIPTOR_S_BIT, DESCRIPTOR_S_BIT);
        for chunk in &chunks[1..] {
            assert_eq!(chunk.bytes[0] & DESCRIPTOR_S_BIT, 0);
        }
        assert!(!chunks[0].marker);
        assert!(chunks.last().unwrap().marker);
    }

    #[test]
    fn picture_id_increments_and_wraps_across_frames() {
        let mut p = Vp8Payloader { picture_id: u16::MAX };
        let first = p.frame_to_payloads(&frame(vec![1]), 1200).unwrap();
        let id0 = (((first[0].bytes[2] & 0x7F) as u16) << 8) | first[0].bytes[3] as u16;
        assert_eq!(id0, u16::MAX);

        let second = p.frame_to_payloads(&frame(vec![1]), 1200).unwrap();
        let id1 = (((second[0].bytes[2] & 0x7F) as u16) << 8) | second[0].bytes[3] as u16;
        assert_eq!(id1, 0);
    }
}
