//! Encrypt path: fresh key per object, chunked ciphertext, per-recipient key wrapping.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::aead::{AeadStream, CipherError};
use super::ecies::{self, RecipientKey};
use super::hash::ContentHasher;
use super::key::{CipherFormat, KeyMaterial};
use super::utils::{
    encode_base64, generate_nonce, generate_symmetric_key, NONCE_SIZE, SYMMETRIC_KEY_SIZE,
    TAG_SIZE,
};

/// Public parameters needed (with a key) to decrypt the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherHeader {
    pub format: CipherFormat,
    /// Multibase base64 nonce.
    pub nonce: String,
}

/// Everything produced by one completed [`StreamCipher`] run.
#[derive(Debug, Clone)]
pub struct CipherResult {
    /// Ciphertext emitted by `finalize` (empty for streaming formats).
    pub final_chunk: Vec<u8>,
    pub tag: [u8; TAG_SIZE],
    /// ContentId of the plaintext.
    pub content_hash: String,
    pub header: CipherHeader,
    /// Symmetric key wrapped separately for each recipient, keyed by recipient id.
    pub wrapped_keys: BTreeMap<String, Vec<u8>>,
    pub plaintext_size: u64,
    pub ciphertext_size: u64,
    nonce: [u8; NONCE_SIZE],
    recipients: Vec<RecipientKey>,
}

impl CipherResult {
    /// Recover the key material for `recipient_id` using its private key.
    pub fn key_for(&self, recipient_id: &str, private_key: &[u8]) -> Result<KeyMaterial, CipherError> {
        let wrapped = self
            .wrapped_keys
            .get(recipient_id)
            .ok_or(CipherError::InvalidKey("no wrapped key for recipient"))?;
        let key = Zeroizing::new(ecies::unwrap_key(wrapped, private_key).map_err(|source| {
            CipherError::KeyWrap {
                recipient: recipient_id.to_string(),
                source,
            }
        })?);
        let material =
            KeyMaterial::from_slices(&key, &self.nonce, Some(&self.tag[..]), self.header.format)?;
        Ok(material.with_recipients(self.recipients.clone()))
    }

    /// Build the key registration request for the key service.
    pub fn registration(
        &self,
        domain: &str,
        identifiers: BTreeMap<String, String>,
    ) -> KeyRegistration {
        KeyRegistration {
            domain: domain.to_string(),
            content_hash: self.content_hash.clone(),
            format: self.header.format,
            nonce: self.header.nonce.clone(),
            tag: encode_base64(&self.tag),
            identifiers,
            keys: self
                .wrapped_keys
                .iter()
                .map(|(id, wrapped)| (id.clone(), encode_base64(wrapped)))
                .collect(),
        }
    }
}

/// Request registering a newly encrypted object's wrapped keys with the key service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRegistration {
    pub domain: String,
    pub content_hash: String,
    pub format: CipherFormat,
    pub nonce: String,
    pub tag: String,
    pub identifiers: BTreeMap<String, String>,
    /// Multibase base64 wrapped key per recipient id.
    pub keys: BTreeMap<String, String>,
}

/// Streaming encryptor.
///
/// ```text
/// let mut cipher = StreamCipher::open(&recipients)?;
/// sink.write_all(&cipher.update(chunk)?)?;  // repeated
/// let result = cipher.finalize()?;
/// sink.write_all(&result.final_chunk)?;
/// ```
pub struct StreamCipher {
    engine: AeadStream,
    key: Zeroizing<[u8; SYMMETRIC_KEY_SIZE]>,
    nonce: [u8; NONCE_SIZE],
    format: CipherFormat,
    recipients: Vec<RecipientKey>,
    hasher: ContentHasher,
    ciphertext_size: u64,
}

impl StreamCipher {
    /// Open with the default (streaming) format.
    pub fn open(recipients: &[RecipientKey]) -> Result<Self, CipherError> {
        Self::open_with_format(recipients, CipherFormat::default())
    }

    pub fn open_with_format(
        recipients: &[RecipientKey],
        format: CipherFormat,
    ) -> Result<Self, CipherError> {
        if recipients.is_empty() {
            return Err(CipherError::Init("at least one recipient public key is required"));
        }

        let key = Zeroizing::new(generate_symmetric_key());
        let nonce = generate_nonce();
        let engine = AeadStream::new(format, &key, &nonce);
        log::debug!(
            "Cipher opened ({}) for {} recipient(s)",
            format,
            recipients.len()
        );

        Ok(Self {
            engine,
            key,
            nonce,
            format,
            recipients: recipients.to_vec(),
            hasher: ContentHasher::new(),
            ciphertext_size: 0,
        })
    }

    pub fn format(&self) -> CipherFormat {
        self.format
    }

    /// Feed plaintext, returning whatever ciphertext is ready.
    pub fn update(&mut self, chunk: &[u8]) -> Result<Vec<u8>, CipherError> {
        let out = self.engine.encrypt(chunk)?;
        self.hasher.update(chunk);
        self.ciphertext_size += out.len() as u64;
        Ok(out)
    }

    /// Compute the tag and wrap the key for every recipient.
    ///
    /// Consumes the cipher: on error nothing of the run survives.
    pub fn finalize(self) -> Result<CipherResult, CipherError> {
        let (final_chunk, tag) = self.engine.finish_encrypt()?;

        let mut wrapped_keys = BTreeMap::new();
        for recipient in &self.recipients {
            let wrapped = ecies::wrap_key(&self.key[..], &recipient.public_key).map_err(|source| {
                CipherError::KeyWrap {
                    recipient: recipient.id.clone(),
                    source,
                }
            })?;
            wrapped_keys.insert(recipient.id.clone(), wrapped);
        }

        let plaintext_size = self.hasher.len();
        let ciphertext_size = self.ciphertext_size + final_chunk.len() as u64;
        let content_hash = self.hasher.finalize();
        log::debug!(
            "Cipher finalized: {} plaintext bytes, hash {}",
            plaintext_size,
            content_hash
        );

        Ok(CipherResult {
            final_chunk,
            tag,
            content_hash,
            header: CipherHeader {
                format: self.format,
                nonce: encode_base64(&self.nonce),
            },
            wrapped_keys,
            plaintext_size,
            ciphertext_size,
            nonce: self.nonce,
            recipients: self.recipients,
        })
    }
}
