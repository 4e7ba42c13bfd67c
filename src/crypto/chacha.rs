//! Streaming ChaCha20-Poly1305 (RFC 8439) with a detached tag.
//!
//! The one-shot `chacha20poly1305` AEAD needs the whole message in memory. Here
//! the construction is assembled from its parts so ciphertext can be produced
//! and consumed chunk by chunk, while still computing the exact RFC 8439 tag:
//!
//! - Poly1305 key = first 32 bytes of keystream block 0
//! - payload keystream starts at block 1
//! - MAC input = ciphertext || pad16 || le64(aad_len = 0) || le64(ciphertext_len)

use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use chacha20::ChaCha20;
use poly1305::universal_hash::{KeyInit, UniversalHash};
use poly1305::Poly1305;
use zeroize::Zeroizing;

use super::aead::CipherError;
use super::utils::{NONCE_SIZE, SYMMETRIC_KEY_SIZE, TAG_SIZE};

/// Poly1305 block size in bytes.
const POLY_BLOCK_SIZE: usize = 16;

/// Offset of the first payload keystream byte (block 1).
const PAYLOAD_KEYSTREAM_OFFSET: u64 = 64;

pub(crate) struct ChaChaPolyStream {
    cipher: ChaCha20,
    mac: Poly1305,
    /// Ciphertext bytes not yet forming a full Poly1305 block.
    pending: Vec<u8>,
    ciphertext_len: u64,
}

impl ChaChaPolyStream {
    pub(crate) fn new(key: &[u8; SYMMETRIC_KEY_SIZE], nonce: &[u8; NONCE_SIZE]) -> Self {
        let mut cipher = ChaCha20::new(
            chacha20::Key::from_slice(key),
            chacha20::Nonce::from_slice(nonce),
        );

        let mut mac_key = Zeroizing::new([0u8; 32]);
        cipher.apply_keystream(&mut mac_key[..]);
        let mac = Poly1305::new(poly1305::Key::from_slice(&mac_key[..]));
        cipher.seek(PAYLOAD_KEYSTREAM_OFFSET);

        Self {
            cipher,
            mac,
            pending: Vec::with_capacity(POLY_BLOCK_SIZE),
            ciphertext_len: 0,
        }
    }

    /// Encrypt one chunk, returning the ciphertext for it.
    pub(crate) fn encrypt(&mut self, chunk: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mut out = chunk.to_vec();
        self.keystream(&mut out)?;
        self.absorb(&out);
        Ok(out)
    }

    /// Decrypt one chunk. The output is unauthenticated until `verify` succeeds.
    pub(crate) fn decrypt(&mut self, chunk: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mut out = chunk.to_vec();
        self.keystream(&mut out)?;
        self.absorb(chunk);
        Ok(out)
    }

    pub(crate) fn tag(self) -> [u8; TAG_SIZE] {
        let computed = self.finish_mac().finalize();
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&computed);
        tag
    }

    /// Constant-time comparison of the computed tag against `expected`.
    pub(crate) fn verify(self, expected: &[u8; TAG_SIZE]) -> Result<(), CipherError> {
        self.finish_mac()
            .verify(poly1305::Block::from_slice(expected))
            .map_err(|_| CipherError::Authentication)
    }

    /// The 32-bit block counter caps one run at 256 GiB.
    fn keystream(&mut self, buf: &mut [u8]) -> Result<(), CipherError> {
        self.cipher
            .try_apply_keystream(buf)
            .map_err(|_| CipherError::StreamTooLong)
    }

    fn absorb(&mut self, mut data: &[u8]) {
        self.ciphertext_len += data.len() as u64;

        if !self.pending.is_empty() {
            let take = (POLY_BLOCK_SIZE - self.pending.len()).min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.pending.len() < POLY_BLOCK_SIZE {
                return;
            }
            self.mac.update_padded(&self.pending);
            self.pending.clear();
        }

        let whole = data.len() - data.len() % POLY_BLOCK_SIZE;
        if whole > 0 {
            self.mac.update_padded(&data[..whole]);
        }
        self.pending.extend_from_slice(&data[whole..]);
    }

    fn finish_mac(mut self) -> Poly1305 {
        if !self.pending.is_empty() {
            self.mac.update_padded(&self.pending);
        }
        let mut lengths = [0u8; POLY_BLOCK_SIZE];
        lengths[8..].copy_from_slice(&self.ciphertext_len.to_le_bytes());
        self.mac.update_padded(&lengths);
        self.mac
    }
}
