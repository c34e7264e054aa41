//! Shared H.264/H.265 Annex-B payloader: NAL unit splitting, FU-A/FU
//! fragmentation, and avcC/hvcC parameter-set injection on IDR access units
//! (spec §4.3).

use crate::codec::{CodecPayloader, PayloadChunk};
use crate::error::{Error, Result};
use crate::header::payload_type;
use crate::packet::EncodedPacket;

const VIDEO_CLOCK_RATE: u32 = 90_000;

/// H.264 NAL unit type carrying a fragmentation unit (FU-A, RFC 6184 §5.8).
const H264_FU_A: u8 = 28;
/// H.265 NAL unit type carrying a fragmentation unit (RFC 7798 §4.4.3).
const H265_FU: u8 = 49;

/// Which H.26x flavor a [`H26xPayloader`] is configured for. The wire framing
/// (Annex-B splitting, FU-A/FU header layout) differs only in NAL header
/// width and type numbering between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H26xProfile {
    H264,
    H265,
}

/// SPS/PPS (H.264) or VPS/SPS/PPS (H.265) parameter sets extracted from the
/// container's `avcC`/`hvcC` extradata, re-injected ahead of every IDR access
/// unit so a late-joining receiver can decode (spec §4.3, §9.1).
#[derive(Debug, Clone, Default)]
pub struct ParameterSets {
    pub vps: Vec<Vec<u8>>,
    pub sps: Vec<Vec<u8>>,
    pub pps: Vec<Vec<u8>>,
}

impl ParameterSets {
    /// Parses an ISO/IEC 14496-15 `avcC` record.
    pub fn parse_avcc(extradata: &[u8]) -> Result<Self> {
        if extradata.len() < 6 {
            return Err(Error::ExtradataTooShort);
        }
        if extradata[0] != 1 {
            return Err(Error::UnsupportedExtradataVersion(extradata[0]));
        }

        let mut sets = ParameterSets::default();
        let mut pos = 5;

        let num_sps = (extradata[pos] & 0x1F) as usize;
        pos += 1;
        for _ in 0..num_sps {
            pos = read_length_prefixed(extradata, pos, &mut sets.sps)?;
        }

        if pos >= extradata.len() {
            return Err(Error::ExtradataTooShort);
        }
        let num_pps = extradata[pos] as usize;
        pos += 1;
        for _ in 0..num_pps {
            pos = read_length_prefixed(extradata, pos, &mut sets.pps)?;
        }

        Ok(sets)
    }

    /// Parses an ISO/IEC 14496-15 `hvcC` record, pulling VPS (32), SPS (33)
    /// and PPS (34) NAL unit arrays.
    pub fn parse_hvcc(extradata: &[u8]) -> Result<Self> {
        if extradata.len() < 23 {
            return Err(Error::ExtradataTooShort);
        }
        if extradata[0] != 1 {
            return Err(Error::UnsupportedExtradataVersion(extradata[0]));
        }

        let mut sets = ParameterSets::default();
        let num_arrays = extradata[22] as usize;
        let mut pos = 23;

        for _ in 0..num_arrays {
            if pos >= extradata.len() {
                return Err(Error::ExtradataTooShort);
            }
            let nal_unit_type = extradata[pos] & 0x3F;
            pos += 1;
            if pos + 2 > extradata.len() {
                return Err(Error::ExtradataTooShort);
            }
            let num_nalus = u16::from_be_bytes([extradata[pos], extradata[pos + 1]]) as usize;
            pos += 2;

            for _ in 0..num_nalus {
                let dest = match nal_unit_type {
                    32 => &mut sets.vps,
                    33 => &mut sets.sps,
                    34 => &mut sets.pps,
                    _ => {
                        // Skip NALUs we don't collect (SEI, etc.) but still
                        // advance past them correctly.
                        let mut scratch = Vec::new();
                        pos = read_length_prefixed(extradata, pos, &mut scratch)?;
                        continue;
                    }
                };
                pos = read_length_prefixed(extradata, pos, dest)?;
            }
        }

        Ok(sets)
    }

    fn is_empty(&self) -> bool {
        self.vps.is_empty() && self.sps.is_empty() && self.pps.is_empty()
    }
}

fn read_length_prefixed(buf: &[u8], pos: usize, out: &mut Vec<Vec<u8>>) -> Result<usize> {
    if pos + 2 > buf.len() {
        return Err(Error::ExtradataTooShort);
    }
    let len = u16::from_be_bytes([buf[pos], buf[pos + 1]]) as usize;
    let start = pos + 2;
    if start + len > buf.len() {
        return Err(Error::ExtradataTooShort);
    }
    out.push(buf[start..start + len].to_vec());
    Ok(start + len)
}

/// Splits an Annex-B bitstream (NAL units separated by `00 00 01` or
/// `00 00 00 01` start codes) into individual NAL unit slices (start code
/// stripped).
pub fn split_annex_b(bitstream: &[u8]) -> Vec<&[u8]> {
    // Each entry is (data_start, start_code_begin) for one `00 00 01` match,
    // `start_code_begin` stepping back one extra byte for `00 00 00 01`.
    let mut marks = Vec::new();
    let mut i = 0;
    while i + 2 < bitstream.len() {
        if bitstream[i] == 0 && bitstream[i + 1] == 0 && bitstream[i + 2] == 1 {
            let start_code_begin = if i > 0 && bitstream[i - 1] == 0 { i - 1 } else { i };
            marks.push((i + 3, start_code_begin));
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut nalus = Vec::with_capacity(marks.len());
    for (idx, &(data_start, _)) in marks.iter().enumerate() {
        let end = marks
            .get(idx + 1)
            .map(|&(_, next_begin)| next_begin)
            .unwrap_or(bitstream.len());
        let end = end.max(data_start).min(bitstream.len());
        nalus.push(&bitstream[data_start..end]);
    }
    nalus
}

fn nal_type(profile: H26xProfile, nalu: &[u8]) -> u8 {
    match profile {
        H26xProfile::H264 => nalu.first().copied().unwrap_or(0) & 0x1F,
        H26xProfile::H265 => nalu.first().copied().unwrap_or(0) >> 1 & 0x3F,
    }
}

fn is_idr_nalu(profile: H26xProfile, nalu: &[u8]) -> bool {
    match profile {
        H26xProfile::H264 => nal_type(profile, nalu) == 5,
        H26xProfile::H265 => matches!(nal_type(profile, nalu), 19 | 20),
    }
}

/// H.264 NAL unit types for SPS/PPS; H.265 for VPS/SPS/PPS.
const H264_SPS: u8 = 7;
const H264_PPS: u8 = 8;
const H265_VPS: u8 = 32;
const H265_SPS: u8 = 33;
const H265_PPS: u8 = 34;

fn contains_nal_type(profile: H26xProfile, nalus: &[&[u8]], ty: u8) -> bool {
    nalus.iter().any(|n| nal_type(profile, n) == ty)
}

pub struct H26xPayloader {
    profile: H26xProfile,
    parameter_sets: ParameterSets,
}

impl H26xPayloader {
    pub fn new(profile: H26xProfile, parameter_sets: ParameterSets) -> Self {
        Self {
            profile,
            parameter_sets,
        }
    }

    /// Parameter-set NALUs from the container extradata that are not already
    /// present in `nalus`, in VPS/SPS/PPS order (spec §3: injected "if they
    /// were not already present in the bitstream").
    fn missing_parameter_set_nalus(&self, nalus: &[&[u8]]) -> Vec<Vec<u8>> {
        if self.parameter_sets.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::new();
        match self.profile {
            H26xProfile::H264 => {
                if !contains_nal_type(self.profile, nalus, H264_SPS) {
                    out.extend(self.parameter_sets.sps.iter().cloned());
                }
                if !contains_nal_type(self.profile, nalus, H264_PPS) {
                    out.extend(self.parameter_sets.pps.iter().cloned());
                }
            }
            H26xProfile::H265 => {
                if !contains_nal_type(self.profile, nalus, H265_VPS) {
                    out.extend(self.parameter_sets.vps.iter().cloned());
                }
                if !contains_nal_type(self.profile, nalus, H265_SPS) {
                    out.extend(self.parameter_sets.sps.iter().cloned());
                }
                if !contains_nal_type(self.profile, nalus, H265_PPS) {
                    out.extend(self.parameter_sets.pps.iter().cloned());
                }
            }
        }
        out
    }

    /// Fragments one NAL unit into FU-A (H.264)/FU (H.265) packets if it
    /// exceeds `mtu`, otherwise returns it as a single packet (RFC 6184 §5.8,
    /// RFC 7798 §4.4.3). `last_nalu_in_au` controls whether the marker bit
    /// may be set on this NALU's final fragment.
    fn fragment_nalu(&self, nalu: &[u8], mtu: usize, last_nalu_in_au: bool) -> Vec<PayloadChunk> {
        if nalu.len() <= mtu {
            return vec![PayloadChunk {
                bytes: nalu.to_vec(),
                marker: last_nalu_in_au,
            }];
        }

        match self.profile {
            H26xProfile::H264 => {
                let header_byte = nalu[0];
                let nri = header_byte & 0x60;
                let original_type = header_byte & 0x1F;
                let body = &nalu[1..];
                let fu_indicator = (header_byte & 0x80) | nri | H264_FU_A;

                let chunk_size = mtu.saturating_sub(2).max(1);
                let mut chunks = Vec::new();
                let mut offset = 0;
                while offset < body.len() {
                    let end = (offset + chunk_size).min(body.len());
                    let is_first = offset == 0;
                    let is_last = end == body.len();
                    let fu_header = ((is_first as u8) << 7)
                        | ((is_last as u8) << 6)
                        | original_type;

                    let mut bytes = Vec::with_capacity(2 + (end - offset));
                    bytes.push(fu_indicator);
                    bytes.push(fu_header);
                    bytes.extend_from_slice(&body[offset..end]);

                    chunks.push(PayloadChunk {
                        bytes,
                        marker: is_last && last_nalu_in_au,
                    });
                    offset = end;
                }
                chunks
            }
            H26xProfile::H265 => {
                let header0 = nalu[0];
                let header1 = nalu.get(1).copied().unwrap_or(0);
                let layer_id_high = header0 & 0x01;
                let original_type = (header0 >> 1) & 0x3F;
                let body = &nalu[2..];

                let payload_hdr0 = (H265_FU << 1) | layer_id_high;
                let payload_hdr1 = header1;

                let chunk_size = mtu.saturating_sub(3).max(1);
                let mut chunks = Vec::new();
                let mut offset = 0;
                while offset < body.len() {
                    let end = (offset + chunk_size).min(body.len());
                    let is_first = offset == 0;
                    let is_last = end == body.len();
                    let fu_header = ((is_first as u8) << 7)
                        | ((is_last as u8) << 6)
                        | original_type;

                    let mut bytes = Vec::with_capacity(3 + (end - offset));
                    bytes.push(payload_hdr0);
                    bytes.push(payload_hdr1);
                    bytes.push(fu_header);
                    bytes.extend_from_slice(&body[offset..end]);

                    chunks.push(PayloadChunk {
                        bytes,
                        marker: is_last && last_nalu_in_au,
                    });
                    offset = end;
                }
                chunks
            }
        }
    }
}

impl CodecPayloader for H26xPayloader {
    fn clock_rate(&self) -> u32 {
        VIDEO_CLOCK_RATE
    }

    fn payload_type(&self) -> u8 {
        match self.profile {
            H26xProfile::H264 => payload_type::H264,
            H26xProfile::H265 => payload_type::H265,
        }
    }

    fn uses_header_extension(&self) -> bool {
        true
    }

    fn frame_to_payloads(&mut self, packet: &EncodedPacket, mtu: usize) -> Result<Vec<PayloadChunk>> {
        let nalus = split_annex_b(&packet.payload);
        if nalus.is_empty() {
            return Err(Error::EmptyAccessUnit);
        }

        let needs_parameter_sets =
            packet.is_idr() || nalus.iter().any(|n| is_idr_nalu(self.profile, n));

        let mut owned: Vec<Vec<u8>> = Vec::new();
        if needs_parameter_sets {
            owned.extend(self.missing_parameter_set_nalus(&nalus));
        }
        owned.extend(nalus.into_iter().map(|n| n.to_vec()));

        let last_index = owned.len() - 1;
        let mut chunks = Vec::new();
        for (idx, nalu) in owned.iter().enumerate() {
            chunks.extend(self.fragment_nalu(nalu, mtu, idx == last_index));
        }
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Codec, PacketFlags};

    fn h264_frame(payload: Vec<u8>, idr: bool) -> EncodedPacket {
        EncodedPacket {
            codec: Codec::H264,
            payload,
            pts_hi: 0,
            pts_lo: 0,
            time_base_num: 1,
            time_base_den: 90_000,
            duration: 3000,
            flags: if idr {
                PacketFlags::IDR
            } else {
                PacketFlags::default()
            },
        }
    }

    fn annex_b(nalus: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for n in nalus {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(n);
        }
        out
    }

    #[test]
    fn splits_annex_b_into_individual_nalus() {
        let bitstream = annex_b(&[&[0x67, 1, 2], &[0x68, 3, 4]]);
        let nalus = split_annex_b(&bitstream);
        assert_eq!(nalus, vec![&[0x67u8, 1, 2][..], &[0x68u8, 3, 4][..]]);
    }

    #[test]
    fn small_nalu_is_not_fragmented_and_last_gets_marker() {
        let mut p = H26xPayloader::new(H26xProfile::H264, ParameterSets::default());
        let bitstream = annex_b(&[&[0x61, 1, 2, 3]]);
        let chunks = p.frame_to_payloads(&h264_frame(bitstream, false), 1200).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].marker);
        assert_eq!(chunks[0].bytes, vec![0x61, 1, 2, 3]);
    }

    #[test]
    fn large_nalu_fragments_as_fu_a_with_start_and_end_bits() {
        let mut p = H26xPayloader::new(H26xProfile::H264, ParameterSets::default());
        let mut body = vec![0x65u8]; // nal header: NRI=0, type=5 (IDR)
        body.extend(std::iter::repeat(0xAB).take(20));
        let bitstream = annex_b(&[&body]);

        let chunks = p.frame_to_payloads(&h264_frame(bitstream, true), 10).unwrap();
        assert!(chunks.len() > 1);

        let first = &chunks[0].bytes;
        assert_eq!(first[0] & 0x1F, H264_FU_A);
        assert_eq!(first[1] & 0x80, 0x80); // start bit
        assert_eq!(first[1] & 0x1F, 5); // original type preserved

        let last = chunks.last().unwrap();
        assert_eq!(last.bytes[1] & 0x40, 0x40); // end bit
        assert!(last.marker);
        assert!(!chunks[0].marker);
    }

    #[test]
    fn fu_a_indicator_copies_f_bit_from_source_nal_header() {
        let mut p = H26xPayloader::new(H26xProfile::H264, ParameterSets::default());
        // F=1, NRI=2 (0x40), type=5 (IDR): header byte 0xC5.
        let mut body = vec![0xC5u8];
        body.extend(std::iter::repeat(0xAB).take(20));
        let bitstream = annex_b(&[&body]);

        let chunks = p.frame_to_payloads(&h264_frame(bitstream, true), 10).unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert_eq!(chunk.bytes[0] & 0x80, 0x80, "F bit must be copied from the source NAL header");
            assert_eq!(chunk.bytes[0] & 0x60, 0x40, "NRI must be copied from the source NAL header");
        }
    }

    #[test]
    fn idr_access_unit_gets_parameter_sets_injected() {
        let sets = ParameterSets {
            vps: vec![],
            sps: vec![vec![0x67, 0xAA]],
            pps: vec![vec![0x68, 0xBB]],
        };
        let mut p = H26xPayloader::new(H26xProfile::H264, sets);
        let bitstream = annex_b(&[&[0x65, 1, 2]]);
        let chunks = p.frame_to_payloads(&h264_frame(bitstream, true), 1200).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].bytes, vec![0x67, 0xAA]);
        assert_eq!(chunks[1].bytes, vec![0x68, 0xBB]);
        assert_eq!(chunks[2].bytes, vec![0x65, 1, 2]);
        assert!(chunks[2].marker);
        assert!(!chunks[0].marker);
    }

    #[test]
    fn idr_access_unit_already_carrying_sps_pps_is_not_duplicated() {
        let sets = ParameterSets {
            vps: vec![],
            sps: vec![vec![0x67, 0xAA]],
            pps: vec![vec![0x68, 0xBB]],
        };
        let mut p = H26xPayloader::new(H26xProfile::H264, sets);
        // Access unit already carries its own SPS/PPS ahead of the IDR.
        let bitstream = annex_b(&[&[0x67, 0xCC], &[0x68, 0xDD], &[0x65, 1, 2]]);
        let chunks = p.frame_to_payloads(&h264_frame(bitstream, true), 1200).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].bytes, vec![0x67, 0xCC]);
        assert_eq!(chunks[1].bytes, vec![0x68, 0xDD]);
        assert_eq!(chunks[2].bytes, vec![0x65, 1, 2]);
    }

    #[test]
    fn idr_access_unit_missing_only_pps_gets_pps_injected() {
        let sets = ParameterSets {
            vps: vec![],
            sps: vec![vec![0x67, 0xAA]],
            pps: vec![vec![0x68, 0xBB]],
        };
        let mut p = H26xPayloader::new(H26xProfile::H264, sets);
        // Access unit already has its own SPS, but no PPS.
        let bitstream = annex_b(&[&[0x67, 0xCC], &[0x65, 1, 2]]);
        let chunks = p.frame_to_payloads(&h264_frame(bitstream, true), 1200).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].bytes, vec![0x68, 0xBB]);
        assert_eq!(chunks[1].bytes, vec![0x67, 0xCC]);
        assert_eq!(chunks[2].bytes, vec![0x65, 1, 2]);
    }

    #[test]
    fn avcc_parse_rejects_unsupported_version() {
        let extradata = vec![2, 0, 0, 0, 0xFF, 0xE0];
        assert_eq!(
            ParameterSets::parse_avcc(&extradata).unwrap_err(),
            Error::UnsupportedExtradataVersion(2)
        );
    }

    #[test]
    fn avcc_parse_extracts_sps_and_pps() {
        let mut extradata = vec![1, 0x64, 0, 0x1F, 0xFF];
        extradata.push(0xE1); // 1 SPS
        extradata.extend_from_slice(&[0, 3]);
        extradata.extend_from_slice(&[0x67, 1, 2]);
        extradata.push(1); // 1 PPS
        extradata.extend_from_slice(&[0, 2]);
        extradata.extend_from_slice(&[0x68, 3]);

        let sets = ParameterSets::parse_avcc(&extradata).unwrap();
        assert_eq!(sets.sps, vec![vec![0x67, 1, 2]]);
        assert_eq!(sets.pps, vec![vec![0x68, 3]]);
    }
}
