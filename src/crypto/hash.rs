//! Content hashing for ContentIds.
//!
//! A ContentId is the SHA-256 digest of the plaintext, framed as a multihash and
//! encoded as multibase base64url (`u` prefix). The alphabet contains no `/`,
//! `.` or `+`, so ids are usable directly as file name stems.

use base64::Engine;
use multihash::Multihash;
use sha2::{Digest, Sha256};

/// Multihash code for SHA2-256.
const SHA2_256_CODE: u64 = 0x12;

/// Multibase prefix for base64url without padding.
const MULTIBASE_BASE64URL: char = 'u';

/// Incremental hasher producing ContentIds.
#[derive(Clone, Default)]
pub struct ContentHasher {
    inner: Sha256,
    len: u64,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
        self.len += chunk.len() as u64;
    }

    /// Bytes hashed so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn finalize(self) -> String {
        encode_digest(&self.inner.finalize())
    }
}

/// Hash a complete buffer.
pub fn content_hash(data: &[u8]) -> String {
    encode_digest(&Sha256::digest(data))
}

fn encode_digest(digest: &[u8]) -> String {
    // A 32-byte digest always fits the 64-byte multihash allocation.
    let bytes = match Multihash::<64>::wrap(SHA2_256_CODE, digest) {
        Ok(mh) => mh.to_bytes(),
        Err(_) => digest.to_vec(),
    };
    format!(
        "{}{}",
        MULTIBASE_BASE64URL,
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    )
}
