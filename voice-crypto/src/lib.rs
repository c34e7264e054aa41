#![warn(rust_2018_idioms)]
#![allow(dead_code)]

//! AEAD transport encryptors for Discord voice/Go-Live SRTP (spec §4.1).
//!
//! Both supported AEAD families share one contract:
//! `encrypt(plaintext, associated_data) -> (ciphertext‖tag, nonce)`. The wire
//! nonce is always the low 4 bytes of a 32-bit big-endian monotonic counter,
//! zero-padded on the left to the cipher's native nonce width before use.

pub mod error;
mod nonce;

pub use error::{Error, Result};
pub use nonce::NonceCounter;

use aead::{Aead as _, KeyInit, Payload};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::XChaCha20Poly1305;

/// Which AEAD family is in use for a session. Chosen once, at
/// `SELECT_PROTOCOL_ACK` time, and held for the lifetime of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AeadKind {
    Aes256Gcm,
    XChaCha20Poly1305,
}

impl AeadKind {
    /// Width in bytes of this AEAD's native nonce.
    pub fn nonce_len(self) -> usize {
        match self {
            AeadKind::Aes256Gcm => 12,
            AeadKind::XChaCha20Poly1305 => 24,
        }
    }

    /// Selects AES-256-GCM unless the peer doesn't advertise it or the caller
    /// forced ChaCha20 (spec §4.1 / §4.5).
    pub fn select(peer_supports_aes_gcm: bool, force_chacha20: bool) -> AeadKind {
        if peer_supports_aes_gcm && !force_chacha20 {
            AeadKind::Aes256Gcm
        } else {
            AeadKind::XChaCha20Poly1305
        }
    }

    /// The SELECT_PROTOCOL mode string advertised/accepted on the wire.
    pub fn mode_name(self) -> &'static str {
        match self {
            AeadKind::Aes256Gcm => "aead_aes256_gcm_rtpsize",
            AeadKind::XChaCha20Poly1305 => "aead_xchacha20_poly1305_rtpsize",
        }
    }
}

enum Cipher {
    Aes256Gcm(Box<Aes256Gcm>),
    XChaCha20Poly1305(Box<XChaCha20Poly1305>),
}

/// A keyed AEAD transport encryptor. Holds a handle to the monotonic nonce
/// counter for its key; a session's sibling streams (e.g. audio and video)
/// build separate `Aead` instances over the same key via [`Aead::with_counter`]
/// so they never reuse a nonce, while each instance is still exclusively
/// owned by one packetizer (spec §5: "all callers on a given key share one
/// counter ... must be mutually exclusive per encryption call").
pub struct Aead {
    kind: AeadKind,
    cipher: Cipher,
    counter: NonceCounter,
}

impl Aead {
    /// Imports a 32-byte master key for the given AEAD family, with its own
    /// fresh nonce counter.
    pub fn new(kind: AeadKind, key: &[u8]) -> Result<Self> {
        Self::with_counter(kind, key, NonceCounter::default())
    }

    /// Imports a 32-byte master key, sharing `counter` with every other
    /// `Aead` built from it. Use this to put a session's audio and video
    /// packetizers on the same key and the same nonce space (spec §5: "all
    /// callers on a given key share one counter").
    pub fn with_counter(kind: AeadKind, key: &[u8], counter: NonceCounter) -> Result<Self> {
        if key.len() != 32 {
            return Err(Error::InvalidKeyLength(key.len()));
        }
        let cipher = match kind {
            AeadKind::Aes256Gcm => {
                Cipher::Aes256Gcm(Box::new(Aes256Gcm::new_from_slice(key).map_err(|_| {
                    Error::InvalidKeyLength(key.len())
                })?))
            }
            AeadKind::XChaCha20Poly1305 => Cipher::XChaCha20Poly1305(Box::new(
                XChaCha20Poly1305::new_from_slice(key)
                    .map_err(|_| Error::InvalidKeyLength(key.len()))?,
            )),
        };
        Ok(Self {
            kind,
            cipher,
            counter,
        })
    }

    pub fn kind(&self) -> AeadKind {
        self.kind
    }

    /// Returns a handle to this instance's nonce counter, to build a sibling
    /// `Aead` (same key, same AEAD family) that shares the nonce space.
    pub fn shared_counter(&self) -> NonceCounter {
        self.counter.clone()
    }

    fn full_nonce(&self, counter: u32) -> Vec<u8> {
        let mut nonce = vec![0u8; self.kind.nonce_len()];
        let len = nonce.len();
        nonce[len - 4..].copy_from_slice(&counter.to_be_bytes());
        nonce
    }

    /// Encrypts `plaintext` under `aad`, advancing the nonce counter.
    /// Returns `(ciphertext ‖ tag, low 4 bytes of the nonce)`.
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<(Vec<u8>, [u8; 4])> {
        let counter = self.counter.next();
        let nonce = self.full_nonce(counter);
        let payload = Payload { msg: plaintext, aad };
        let ciphertext = match &self.cipher {
            Cipher::Aes256Gcm(c) => c
                .encrypt(aes_gcm::Nonce::from_slice(&nonce), payload)
                .map_err(|_| Error::EncryptionFailed)?,
            Cipher::XChaCha20Poly1305(c) => c
                .encrypt(chacha20poly1305::XNonce::from_slice(&nonce), payload)
                .map_err(|_| Error::EncryptionFailed)?,
        };
        Ok((ciphertext, counter.to_be_bytes()))
    }

    /// Decrypts a packet given the truncated nonce from the wire, the high
    /// bytes reconstructed as zero per spec §8. Exposed for round-trip tests
    /// and is not used on the (send-only) production path.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        aad: &[u8],
        nonce_lo: [u8; 4],
    ) -> Result<Vec<u8>> {
        let mut nonce = vec![0u8; self.kind.nonce_len()];
        let len = nonce.len();
        nonce[len - 4..].copy_from_slice(&nonce_lo);
        let payload = Payload {
            msg: ciphertext,
            aad,
        };
        match &self.cipher {
            Cipher::Aes256Gcm(c) => c
                .decrypt(aes_gcm::Nonce::from_slice(&nonce), payload)
                .map_err(|_| Error::AuthenticationFailed),
            Cipher::XChaCha20Poly1305(c) => c
                .decrypt(chacha20poly1305::XNonce::from_slice(&nonce), payload)
                .map_err(|_| Error::AuthenticationFailed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aes_gcm_round_trip_and_nonce_monotonicity() {
        let key = [0u8; 32];
        let enc = Aead::new(AeadKind::Aes256Gcm, &key).unwrap();
        let dec = Aead::new(AeadKind::Aes256Gcm, &key).unwrap();

        let header = b"fake-12-byte-header-aad";
        let (ct1, nonce1) = enc.encrypt(b"hello world", header).unwrap();
        let (ct2, nonce2) = enc.encrypt(b"hello again", header).unwrap();

        assert_eq!(u32::from_be_bytes(nonce2), u32::from_be_bytes(nonce1).wrapping_add(1));

        let pt1 = dec.decrypt(&ct1, header, nonce1).unwrap();
        assert_eq!(pt1, b"hello world");
        let pt2 = dec.decrypt(&ct2, header, nonce2).unwrap();
        assert_eq!(pt2, b"hello again");
    }

    #[test]
    fn xchacha20_round_trip() {
        let key = [7u8; 32];
        let enc = Aead::new(AeadKind::XChaCha20Poly1305, &key).unwrap();
        let dec = Aead::new(AeadKind::XChaCha20Poly1305, &key).unwrap();
        let (ct, nonce) = enc.encrypt(b"opus payload bytes", b"aad").unwrap();
        let pt = dec.decrypt(&ct, b"aad", nonce).unwrap();
        assert_eq!(pt, b"opus payload bytes");
    }

    #[test]
    fn tampered_aad_fails_authentication() {
        let key = [3u8; 32];
        let enc = Aead::new(AeadKind::Aes256Gcm, &key).unwrap();
        let dec = Aead::new(AeadKind::Aes256Gcm, &key).unwrap();
        let (ct, nonce) = enc.encrypt(b"payload", b"correct-aad-12").unwrap();
        let err = dec.decrypt(&ct, b"wrong-aad-123", nonce).unwrap_err();
        assert_eq!(err, Error::AuthenticationFailed);
    }

    #[test]
    fn rejects_short_key() {
        let err = Aead::new(AeadKind::Aes256Gcm, &[0u8; 16]).unwrap_err();
        assert_eq!(err, Error::InvalidKeyLength(16));
    }

    #[test]
    fn select_prefers_aes_gcm_unless_forced_or_unsupported() {
        assert_eq!(AeadKind::select(true, false), AeadKind::Aes256Gcm);
        assert_eq!(AeadKind::select(true, true), AeadKind::XChaCha20Poly1305);
        assert_eq!(AeadKind::select(false, false), AeadKind::XChaCha20Poly1305);
    }

    #[test]
    fn sibling_aeads_sharing_a_counter_never_repeat_a_nonce() {
        let key = [9u8; 32];
        let audio = Aead::new(AeadKind::Aes256Gcm, &key).unwrap();
        let video = Aead::with_counter(AeadKind::Aes256Gcm, &key, audio.shared_counter()).unwrap();

        let (_, n0) = audio.encrypt(b"audio frame 0", b"aad").unwrap();
        let (_, n1) = video.encrypt(b"video frame 0", b"aad").unwrap();
        let (_, n2) = audio.encrypt(b"audio frame 1", b"aad").unwrap();

        assert_eq!(u32::from_be_bytes(n0), 0);
        assert_eq!(u32::from_be_bytes(n1), 1);
        assert_eq!(u32::from_be_bytes(n2), 2);
    }
}
