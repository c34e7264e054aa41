use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the transport encryptors.
///
/// Per spec, key-import errors and authentication failures on any
/// encrypt/decrypt call are fatal for the owning session.
#[derive(Error, Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum Error {
    #[error("master key must be 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("AEAD encryption failed")]
    EncryptionFailed,
    #[error("AEAD authentication failed")]
    AuthenticationFailed,
}
