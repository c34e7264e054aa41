use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by a pacing stream (spec §7 "ProtocolState", "Codec").
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("packetizer failure: {0}")]
    Packetizer(#[from] voice_rtp::Error),
    #[error("pacing stream input queue has already been terminated")]
    Terminated,
}
