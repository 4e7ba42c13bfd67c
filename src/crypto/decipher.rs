//! Decrypt path with fail-closed tag verification.
//!
//! Streaming formats emit plaintext from `update` before the tag is known to
//! be good. Callers must treat that output as untrusted until `finalize`
//! returns `Ok`, and discard it otherwise.

use super::aead::{AeadStream, CipherError};
use super::key::KeyMaterial;
use super::utils::TAG_SIZE;

pub struct StreamDecipher {
    engine: AeadStream,
    tag: [u8; TAG_SIZE],
    plaintext_size: u64,
}

impl StreamDecipher {
    /// The tag travels with the key material and must be present up front.
    pub fn open(key: &KeyMaterial) -> Result<Self, CipherError> {
        let tag = *key.tag().ok_or(CipherError::MissingTag)?;
        Ok(Self {
            engine: AeadStream::new(key.format(), key.key(), key.nonce()),
            tag,
            plaintext_size: 0,
        })
    }

    pub fn update(&mut self, chunk: &[u8]) -> Result<Vec<u8>, CipherError> {
        let out = self.engine.decrypt(chunk)?;
        self.plaintext_size += out.len() as u64;
        Ok(out)
    }

    /// Verify the tag, returning any trailing plaintext.
    pub fn finalize(self) -> Result<Vec<u8>, CipherError> {
        let emitted = self.plaintext_size;
        self.engine.finish_decrypt(&self.tag).map_err(|e| {
            log::warn!(
                "Authentication failed after {} plaintext bytes, output must be discarded",
                emitted
            );
            e
        })
    }
}
