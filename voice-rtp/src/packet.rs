//! The demuxer/encoder's output unit (spec §3 `EncodedPacket`).

/// Which codec produced an [`EncodedPacket`]'s payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Opus,
    H264,
    H265,
    Vp8,
}

bitflags::bitflags! {
    /// Flags carried on an encoded packet.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PacketFlags: u8 {
        const IDR = 0b0000_0001;
    }
}

/// One encoded frame/access-unit as produced by the demuxer, consumed once by
/// the pacing stream. PTS is carried as the hi/lo split the spec names
/// (`ptshi:pts`) plus a container time base, matching fractional timestamps
/// from formats like MPEG-TS.
#[derive(Debug, Clone)]
pub struct EncodedPacket {
    pub codec: Codec,
    pub payload: Vec<u8>,
    pub pts_hi: i32,
    pub pts_lo: u32,
    pub time_base_num: u32,
    pub time_base_den: u32,
    pub duration: u32,
    pub flags: PacketFlags,
}

impl EncodedPacket {
    pub fn is_idr(&self) -> bool {
        self.flags.contains(PacketFlags::IDR)
    }

    /// `combineHiLo(ptshi, pts) · time_base_num / time_base_den · 1000`
    /// (spec §4.4 step 1), in milliseconds.
    pub fn pts_ms(&self) -> f64 {
        let combined = ((self.pts_hi as i64) << 32) | (self.pts_lo as i64);
        combined as f64 * self.time_base_num as f64 / self.time_base_den as f64 * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pts_ms_combines_hi_lo_and_scales_time_base() {
        let pkt = EncodedPacket {
            codec: Codec::Opus,
            payload: vec![],
            pts_hi: 0,
            pts_lo: 48_000,
            time_base_num: 1,
            time_base_den: 48_000,
            duration: 960,
            flags: PacketFlags::default(),
        };
        assert!((pkt.pts_ms() - 1000.0).abs() < 1e-9);
    }
}
