//! Discord's UDP IP-discovery handshake (spec §4.2, §6).

use byteorder::{BigEndian, ByteOrder};
use std::net::Ipv4Addr;

use crate::error::{Error, Result};

pub const REQUEST_LEN: usize = 74;
const REQUEST_TYPE: u16 = 0x0001;
const REQUEST_BODY_LEN: u16 = 0x0046;
const REPLY_TYPE: u16 = 0x0002;
const ADDRESS_OFFSET: usize = 8;
const ADDRESS_FIELD_LEN: usize = 64;

/// The result of a successful IP-discovery roundtrip: our public endpoint as
/// seen by Discord's voice server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveredAddress {
    pub ip: Ipv4Addr,
    pub port: u16,
}

/// Builds the 74-byte discovery request for a given audio SSRC.
pub fn build_request(audio_ssrc: u32) -> [u8; REQUEST_LEN] {
    let mut buf = [0u8; REQUEST_LEN];
    BigEndian::write_u16(&mut buf[0..2], REQUEST_TYPE);
    BigEndian::write_u16(&mut buf[2..4], REQUEST_BODY_LEN);
    BigEndian::write_u32(&mut buf[4..8], audio_ssrc);
    // Remaining 66 bytes are already zero.
    buf
}

/// Parses a discovery reply datagram, validating the packet type and
/// extracting our publicly visible IPv4 address and port.
pub fn parse_reply(buf: &[u8]) -> Result<DiscoveredAddress> {
    if buf.len() < ADDRESS_OFFSET + ADDRESS_FIELD_LEN + 2 {
        return Err(Error::ReplyTooShort(buf.len()));
    }
    let reply_type = BigEndian::read_u16(&buf[0..2]);
    if reply_type != REPLY_TYPE {
        return Err(Error::UnexpectedReplyType(reply_type));
    }

    let address_field = &buf[ADDRESS_OFFSET..ADDRESS_OFFSET + ADDRESS_FIELD_LEN];
    let nul_pos = address_field
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(address_field.len());
    let ip_str = std::str::from_utf8(&address_field[..nul_pos])
        .map_err(|_| Error::InvalidAddress(address_field.to_vec()))?;
    let ip: Ipv4Addr = ip_str
        .parse()
        .map_err(|_| Error::InvalidAddress(address_field.to_vec()))?;

    let port = BigEndian::read_u16(&buf[buf.len() - 2..]);

    Ok(DiscoveredAddress { ip, port })
}
