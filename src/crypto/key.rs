//! Symmetric key material handed out by the key service.
//!
//! Lives in memory only for the duration of a fetch or cipher run and is
//! zeroed on drop. `Debug` never prints secret bytes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::aead::CipherError;
use super::ecies::RecipientKey;
use super::utils::{decode_base64, NONCE_SIZE, SYMMETRIC_KEY_SIZE, TAG_SIZE};

/// AEAD construction used for an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CipherFormat {
    /// ChaCha20-Poly1305 (RFC 8439) with a single tag over the whole object.
    /// Fully streaming in both directions.
    #[default]
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
    /// AES-256-GCM. Buffers the object until `finalize`.
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
}

impl CipherFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            CipherFormat::ChaCha20Poly1305 => "chacha20-poly1305",
            CipherFormat::Aes256Gcm => "aes-256-gcm",
        }
    }
}

impl fmt::Display for CipherFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CipherFormat {
    type Err = CipherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chacha20-poly1305" | "chacha20poly1305" => Ok(CipherFormat::ChaCha20Poly1305),
            "aes-256-gcm" | "aes256gcm" => Ok(CipherFormat::Aes256Gcm),
            other => Err(CipherError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Symmetric key + AEAD parameters for one object.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    key: [u8; SYMMETRIC_KEY_SIZE],
    nonce: [u8; NONCE_SIZE],
    tag: Option<[u8; TAG_SIZE]>,
    #[zeroize(skip)]
    format: CipherFormat,
    #[zeroize(skip)]
    recipients: Vec<RecipientKey>,
}

impl KeyMaterial {
    pub fn new(
        key: [u8; SYMMETRIC_KEY_SIZE],
        nonce: [u8; NONCE_SIZE],
        tag: Option<[u8; TAG_SIZE]>,
        format: CipherFormat,
    ) -> Self {
        Self {
            key,
            nonce,
            tag,
            format,
            recipients: Vec::new(),
        }
    }

    /// Build key material from raw slices, validating every length.
    pub fn from_slices(
        key: &[u8],
        nonce: &[u8],
        tag: Option<&[u8]>,
        format: CipherFormat,
    ) -> Result<Self, CipherError> {
        let key: [u8; SYMMETRIC_KEY_SIZE] = key
            .try_into()
            .map_err(|_| CipherError::InvalidKey("symmetric key must be 32 bytes"))?;
        let nonce: [u8; NONCE_SIZE] = nonce
            .try_into()
            .map_err(|_| CipherError::InvalidKey("nonce must be 12 bytes"))?;
        let tag = match tag {
            Some(t) => Some(
                <[u8; TAG_SIZE]>::try_from(t)
                    .map_err(|_| CipherError::InvalidKey("tag must be 16 bytes"))?,
            ),
            None => None,
        };
        Ok(Self::new(key, nonce, tag, format))
    }

    /// Build key material from the base64 fields returned by the key service.
    pub fn from_encoded(
        key: &str,
        nonce: &str,
        tag: Option<&str>,
        format: CipherFormat,
    ) -> Result<Self, CipherError> {
        let mut key_bytes = decode_base64(key, SYMMETRIC_KEY_SIZE)
            .map_err(|_| CipherError::InvalidKey("key must be 32 bytes of base64"))?;
        let nonce_bytes = decode_base64(nonce, NONCE_SIZE)
            .map_err(|_| CipherError::InvalidKey("nonce must be 12 bytes of base64"))?;
        let tag_bytes = tag
            .map(|tag| decode_base64(tag, TAG_SIZE))
            .transpose()
            .map_err(|_| CipherError::InvalidKey("tag must be 16 bytes of base64"))?;
        let result = Self::from_slices(&key_bytes, &nonce_bytes, tag_bytes.as_deref(), format);
        key_bytes.zeroize();
        result
    }

    /// Attach the recipients the content is wrapped for.
    pub fn with_recipients(mut self, recipients: Vec<RecipientKey>) -> Self {
        self.recipients = recipients;
        self
    }

    pub fn key(&self) -> &[u8; SYMMETRIC_KEY_SIZE] {
        &self.key
    }

    pub fn nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.nonce
    }

    pub fn tag(&self) -> Option<&[u8; TAG_SIZE]> {
        self.tag.as_ref()
    }

    pub fn format(&self) -> CipherFormat {
        self.format
    }

    /// Recipients of the object this key opens, when known.
    pub fn recipients(&self) -> &[RecipientKey] {
        &self.recipients
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key", &"<redacted>")
            .field("nonce", &hex::encode(self.nonce))
            .field("tag", &self.tag.map(hex::encode))
            .field("format", &self.format)
            .field("recipients", &self.recipients.len())
            .finish()
    }
}
