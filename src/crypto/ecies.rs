//! Per-recipient key wrapping using ECIES over secp256k1.
//!
//! Each recipient receives its own copy of the symmetric key, encrypted to its
//! public key. Format: ephemeral_pubkey(65) || nonce(16) || tag(16) || ciphertext.

use sha2::{Digest, Sha256};
use thiserror::Error;

/// secp256k1 uncompressed public key size in bytes (04 prefix + x + y coordinates).
pub const SECP256K1_PUBLIC_KEY_SIZE: usize = 65;

/// secp256k1 private key size in bytes.
pub const SECP256K1_PRIVATE_KEY_SIZE: usize = 32;

/// ECIES minimum ciphertext size: ephemeral pubkey (65) + auth tag (16).
pub const ECIES_MIN_CIPHERTEXT_SIZE: usize = SECP256K1_PUBLIC_KEY_SIZE + 16;

#[derive(Debug, Error)]
pub enum EciesError {
    #[error("Key wrapping failed")]
    WrappingFailed,
    #[error("Key unwrapping failed")]
    UnwrappingFailed,
    #[error("Invalid public key size")]
    InvalidPublicKeySize,
    #[error("Invalid public key format")]
    InvalidPublicKeyFormat,
    #[error("Invalid private key size")]
    InvalidPrivateKeySize,
    #[error("Invalid private key")]
    InvalidPrivateKey,
}

/// A recipient able to unwrap the symmetric key of a ciphertext.
///
/// `id` is whatever the recipient directory uses to name the holder
/// (certificate fingerprint, device id). Wrapped keys are reported per `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientKey {
    pub id: String,
    pub public_key: Vec<u8>,
}

impl RecipientKey {
    pub fn new(id: impl Into<String>, public_key: Vec<u8>) -> Result<Self, EciesError> {
        validate_public_key(&public_key)?;
        Ok(Self {
            id: id.into(),
            public_key,
        })
    }

    /// Build a recipient whose id is the hex SHA-256 fingerprint of its public key.
    pub fn from_public_key(public_key: Vec<u8>) -> Result<Self, EciesError> {
        validate_public_key(&public_key)?;
        let id = hex::encode(Sha256::digest(&public_key));
        Ok(Self { id, public_key })
    }
}

fn validate_public_key(public_key: &[u8]) -> Result<(), EciesError> {
    if public_key.len() != SECP256K1_PUBLIC_KEY_SIZE {
        return Err(EciesError::InvalidPublicKeySize);
    }
    // Uncompressed points only
    if public_key[0] != 0x04 {
        return Err(EciesError::InvalidPublicKeyFormat);
    }
    Ok(())
}

/// Wrap (encrypt) a symmetric key for one recipient public key.
pub fn wrap_key(data: &[u8], recipient_public_key: &[u8]) -> Result<Vec<u8>, EciesError> {
    validate_public_key(recipient_public_key)?;
    ecies::encrypt(recipient_public_key, data).map_err(|_| EciesError::WrappingFailed)
}

/// Unwrap (decrypt) a wrapped key with the recipient's private key.
pub fn unwrap_key(wrapped: &[u8], private_key: &[u8]) -> Result<Vec<u8>, EciesError> {
    if private_key.len() != SECP256K1_PRIVATE_KEY_SIZE {
        return Err(EciesError::InvalidPrivateKeySize);
    }

    if wrapped.len() < ECIES_MIN_CIPHERTEXT_SIZE {
        return Err(EciesError::UnwrappingFailed);
    }

    ecies::decrypt(private_key, wrapped).map_err(|_| EciesError::UnwrappingFailed)
}

/// Derive the uncompressed public key (65 bytes, 0x04 prefix) for a private key.
pub fn public_key_for(private_key: &[u8]) -> Result<Vec<u8>, EciesError> {
    let sk = ecies::SecretKey::parse_slice(private_key)
        .map_err(|_| EciesError::InvalidPrivateKey)?;
    let pk = ecies::PublicKey::from_secret_key(&sk);
    Ok(pk.serialize().to_vec())
}
