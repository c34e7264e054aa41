use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors from RTP/RTCP packetization (spec §7 "Codec", "ProtocolState", "Aead").
#[derive(Error, Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum Error {
    #[error("sendFrame called before SSRC/keys are known")]
    NotReady,
    #[error("AEAD failure: {0}")]
    Aead(#[from] voice_crypto::Error),
    #[error("extradata configurationVersion must be 1, got {0}")]
    UnsupportedExtradataVersion(u8),
    #[error("extradata is too short to contain a valid avcC/hvcC record")]
    ExtradataTooShort,
    #[error("unsupported video codec for this packetizer")]
    UnsupportedCodec,
    #[error("empty access unit: no NAL units found in payload")]
    EmptyAccessUnit,
}
