//! Per-SSRC counters shared by the base packetizer (spec §3 `RtpStreamState`).

use std::time::SystemTime;

pub const DEFAULT_MTU: usize = 1200;

/// Owns the sequence/timestamp/byte counters for one SSRC. Reset whenever the
/// SSRC is (re)assigned. Must not be mutated concurrently (spec §5).
#[derive(Debug, Clone)]
pub struct RtpStreamState {
    pub ssrc: u32,
    pub payload_type: u8,
    sequence_number: u16,
    timestamp: u32,
    total_packets: u32,
    total_bytes: u32,
    prev_packets_at_sr: u32,
    pub last_packet_wall_time: Option<SystemTime>,
    pub sr_interval: u32,
    pub mtu: usize,
}

impl RtpStreamState {
    pub fn new(ssrc: u32, payload_type: u8, sr_interval: u32) -> Self {
        Self {
            ssrc,
            payload_type,
            sequence_number: 0,
            timestamp: 0,
            total_packets: 0,
            total_bytes: 0,
            prev_packets_at_sr: 0,
            last_packet_wall_time: None,
            sr_interval,
            mtu: DEFAULT_MTU,
        }
    }

    pub fn sequence_number(&self) -> u16 {
        self.sequence_number
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn total_packets(&self) -> u32 {
        self.total_packets
    }

    pub fn total_bytes(&self) -> u32 {
        self.total_bytes
    }

    /// Returns the sequence number to use for the next packet, then advances
    /// the counter (mod 2^16).
    pub fn next_sequence_number(&mut self) -> u16 {
        let seq = self.sequence_number;
        self.sequence_number = self.sequence_number.wrapping_add(1);
        seq
    }

    /// Advances the RTP timestamp by a codec-specific number of units for one
    /// frame (spec §4.3: Opus `frametime·48000/1000`, video
    /// `frametime·90000/1000`).
    pub fn advance_timestamp(&mut self, frametime_ms: u32, clock_rate: u32) {
        let delta = (frametime_ms as u64 * clock_rate as u64 / 1000) as u32;
        self.timestamp = self.timestamp.wrapping_add(delta);
    }

    /// Records one transmitted packet's payload length and wall time, mod
    /// 2^32 for the byte counter as required for the RTCP-SR octet field.
    pub fn record_sent(&mut self, payload_len: usize, wall_time: SystemTime) {
        self.total_packets = self.total_packets.wrapping_add(1);
        self.total_bytes = self.total_bytes.wrapping_add(payload_len as u32);
        self.last_packet_wall_time = Some(wall_time);
    }

    /// True when `floor(total_packets / sr_interval)` has increased since the
    /// last Sender Report, i.e. an SR boundary was just crossed (spec §3/§4.3).
    pub fn sr_boundary_crossed(&mut self) -> bool {
        if self.sr_interval == 0 {
            return false;
        }
        let current_bucket = self.total_packets / self.sr_interval;
        let prev_bucket = self.prev_packets_at_sr / self.sr_interval;
        if current_bucket > prev_bucket {
            self.prev_packets_at_sr = self.total_packets;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_and_timestamp_advance_as_specified() {
        let mut s = RtpStreamState::new(0x1111_1111, 120, 250);
        assert_eq!(s.next_sequence_number(), 0);
        assert_eq!(s.next_sequence_number(), 1);
        s.advance_timestamp(20, 48_000);
        assert_eq!(s.timestamp(), 960);
    }

    #[test]
    fn sequence_number_wraps_mod_2_16() {
        let mut s = RtpStreamState::new(1, 120, 250);
        for _ in 0..u16::MAX {
            s.next_sequence_number();
        }
        assert_eq!(s.next_sequence_number(), u16::MAX);
        assert_eq!(s.next_sequence_number(), 0);
    }

    #[test]
    fn sr_boundary_fires_once_per_interval() {
        let mut s = RtpStreamState::new(1, 120, 4);
        let now = SystemTime::now();
        for i in 1..=3 {
            s.record_sent(10, now);
            assert!(!s.sr_boundary_crossed(), "packet {i} should not cross");
        }
        s.record_sent(10, now);
        assert!(s.sr_boundary_crossed(), "4th packet should cross the boundary");
        assert!(!s.sr_boundary_crossed(), "boundary should not re-fire immediately");
    }

    #[test]
    fn total_bytes_wraps_mod_2_32() {
        let mut s = RtpStreamState::new(1, 120, 1000);
        let now = SystemTime::now();
        s.record_sent(usize::MAX / 2, now);
        s.record_sent(usize::MAX / 2, now);
        s.record_sent(10, now);
        // Should not panic; value is whatever wrapping_add produces.
        let _ = s.total_bytes();
    }
}
