//! Format dispatch for the stream engines and the cipher error type.

use thiserror::Error;

use super::aes::AesGcmBuffer;
use super::chacha::ChaChaPolyStream;
use super::ecies::EciesError;
use super::key::CipherFormat;
use super::utils::{NONCE_SIZE, SYMMETRIC_KEY_SIZE, TAG_SIZE};

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("Cipher initialisation failed: {0}")]
    Init(&'static str),
    #[error("Authentication tag mismatch")]
    Authentication,
    #[error("Authentication tag required before decrypting")]
    MissingTag,
    #[error("Invalid key material: {0}")]
    InvalidKey(&'static str),
    #[error("Unsupported cipher format: {0}")]
    UnsupportedFormat(String),
    #[error("Key wrapping failed for recipient {recipient}: {source}")]
    KeyWrap {
        recipient: String,
        #[source]
        source: EciesError,
    },
    #[error("Stream exceeds the cipher's keystream limit")]
    StreamTooLong,
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One AEAD run in either direction.
pub(crate) enum AeadStream {
    ChaCha(ChaChaPolyStream),
    AesGcm(AesGcmBuffer),
}

impl AeadStream {
    pub(crate) fn new(
        format: CipherFormat,
        key: &[u8; SYMMETRIC_KEY_SIZE],
        nonce: &[u8; NONCE_SIZE],
    ) -> Self {
        match format {
            CipherFormat::ChaCha20Poly1305 => AeadStream::ChaCha(ChaChaPolyStream::new(key, nonce)),
            CipherFormat::Aes256Gcm => AeadStream::AesGcm(AesGcmBuffer::new(key, nonce)),
        }
    }

    pub(crate) fn encrypt(&mut self, chunk: &[u8]) -> Result<Vec<u8>, CipherError> {
        match self {
            AeadStream::ChaCha(s) => s.encrypt(chunk),
            AeadStream::AesGcm(b) => {
                b.absorb(chunk);
                Ok(Vec::new())
            }
        }
    }

    pub(crate) fn decrypt(&mut self, chunk: &[u8]) -> Result<Vec<u8>, CipherError> {
        match self {
            AeadStream::ChaCha(s) => s.decrypt(chunk),
            AeadStream::AesGcm(b) => {
                b.absorb(chunk);
                Ok(Vec::new())
            }
        }
    }

    /// Returns trailing ciphertext and the tag.
    pub(crate) fn finish_encrypt(self) -> Result<(Vec<u8>, [u8; TAG_SIZE]), CipherError> {
        match self {
            AeadStream::ChaCha(s) => Ok((Vec::new(), s.tag())),
            AeadStream::AesGcm(b) => b.finish_encrypt(),
        }
    }

    /// Returns trailing plaintext once the tag verifies.
    pub(crate) fn finish_decrypt(self, tag: &[u8; TAG_SIZE]) -> Result<Vec<u8>, CipherError> {
        match self {
            AeadStream::ChaCha(s) => s.verify(tag).map(|()| Vec::new()),
            AeadStream::AesGcm(b) => b.finish_decrypt(tag),
        }
    }
}
