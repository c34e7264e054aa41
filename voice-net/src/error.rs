use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors from the UDP transport layer (spec §4.2, §7 "Handshake").
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("socket i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("IP discovery reply has wrong packet type: {0:#06x}")]
    UnexpectedReplyType(u16),
    #[error("IP discovery reply is too short: {0} bytes")]
    ReplyTooShort(usize),
    #[error("IP discovery reply address is not a valid IPv4 literal: {0:?}")]
    InvalidAddress(Vec<u8>),
    #[error("IP discovery timed out waiting for a reply")]
    DiscoveryTimedOut,
}
