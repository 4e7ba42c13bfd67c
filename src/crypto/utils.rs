//! Utility functions for cryptographic operations.

use base64::Engine;
use rand::RngCore;
use thiserror::Error;

/// Symmetric key size in bytes (256 bits), shared by every supported format.
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Nonce size in bytes (96 bits), shared by every supported format.
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size in bytes (128 bits).
pub const TAG_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum UtilError {
    #[error("Invalid hex string")]
    InvalidHex,
    #[error("Invalid base64 string")]
    InvalidBase64,
    #[error("Expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Generate cryptographically secure random bytes.
pub fn generate_random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    buf
}

/// Generate a random 32-byte symmetric key.
pub fn generate_symmetric_key() -> [u8; SYMMETRIC_KEY_SIZE] {
    let mut key = [0u8; SYMMETRIC_KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

/// Generate a random 12-byte nonce.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Convert a hex string to bytes.
pub fn hex_to_bytes(hex: &str) -> Result<Vec<u8>, UtilError> {
    hex::decode(hex).map_err(|_| UtilError::InvalidHex)
}

/// Convert bytes to a hex string.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Decode a base64 field of known size as delivered by the key service.
///
/// The multibase `m` prefix is optional and padding may be missing. Plain
/// base64 can itself start with `m`, so the value is first decoded as is and
/// the prefix is only stripped when that is what yields `len` bytes.
pub fn decode_base64(value: &str, len: usize) -> Result<Vec<u8>, UtilError> {
    let mut decoded = None;
    for candidate in std::iter::once(value).chain(value.strip_prefix('m')) {
        if let Ok(bytes) = decode_unpadded(candidate) {
            if bytes.len() == len {
                return Ok(bytes);
            }
            decoded = Some(bytes.len());
        }
    }
    match decoded {
        Some(actual) => Err(UtilError::InvalidLength {
            expected: len,
            actual,
        }),
        None => Err(UtilError::InvalidBase64),
    }
}

fn decode_unpadded(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD_NO_PAD.decode(value.trim_end_matches('='))
}

/// Encode bytes as multibase base64 (`m` prefix, no padding).
pub fn encode_base64(bytes: &[u8]) -> String {
    format!(
        "m{}",
        base64::engine::general_purpose::STANDARD_NO_PAD.encode(bytes)
    )
}
