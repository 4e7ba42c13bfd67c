//! AES-256-GCM with a detached tag.
//!
//! GCM from the `aes-gcm` crate is one-shot, so the stream adapter buffers the
//! whole object and runs the cipher on `finalize`. Decryption therefore never
//! releases plaintext before the tag has been checked.

use aes_gcm::{
    aead::{generic_array::GenericArray, AeadInPlace, KeyInit},
    Aes256Gcm, Nonce,
};
use zeroize::Zeroizing;

use super::aead::CipherError;
use super::utils::{NONCE_SIZE, SYMMETRIC_KEY_SIZE, TAG_SIZE};

/// Encrypt `buffer` in place, returning the detached tag.
pub fn encrypt_aes_gcm_detached(
    buffer: &mut [u8],
    key: &[u8; SYMMETRIC_KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
) -> Result<[u8; TAG_SIZE], CipherError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CipherError::EncryptionFailed)?;
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(nonce), b"", buffer)
        .map_err(|_| CipherError::EncryptionFailed)?;
    let mut out = [0u8; TAG_SIZE];
    out.copy_from_slice(&tag);
    Ok(out)
}

/// Decrypt `buffer` in place after verifying the detached tag.
///
/// On a tag mismatch `buffer` is left as ciphertext.
pub fn decrypt_aes_gcm_detached(
    buffer: &mut [u8],
    key: &[u8; SYMMETRIC_KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    tag: &[u8; TAG_SIZE],
) -> Result<(), CipherError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CipherError::Authentication)?;
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(nonce),
            b"",
            buffer,
            GenericArray::from_slice(tag),
        )
        .map_err(|_| CipherError::Authentication)
}

/// Buffering stream adapter over AES-256-GCM.
pub(crate) struct AesGcmBuffer {
    key: Zeroizing<[u8; SYMMETRIC_KEY_SIZE]>,
    nonce: [u8; NONCE_SIZE],
    buffer: Zeroizing<Vec<u8>>,
}

impl AesGcmBuffer {
    pub(crate) fn new(key: &[u8; SYMMETRIC_KEY_SIZE], nonce: &[u8; NONCE_SIZE]) -> Self {
        Self {
            key: Zeroizing::new(*key),
            nonce: *nonce,
            buffer: Zeroizing::new(Vec::new()),
        }
    }

    pub(crate) fn absorb(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    pub(crate) fn finish_encrypt(mut self) -> Result<(Vec<u8>, [u8; TAG_SIZE]), CipherError> {
        let tag = encrypt_aes_gcm_detached(&mut self.buffer, &self.key, &self.nonce)?;
        Ok((std::mem::take(&mut *self.buffer), tag))
    }

    pub(crate) fn finish_decrypt(mut self, tag: &[u8; TAG_SIZE]) -> Result<Vec<u8>, CipherError> {
        decrypt_aes_gcm_detached(&mut self.buffer, &self.key, &self.nonce, tag)?;
        Ok(std::mem::take(&mut *self.buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::utils::{generate_nonce, generate_symmetric_key};

    #[test]
    fn test_detached_round_trip() {
        let key = generate_symmetric_key();
        let nonce = generate_nonce();
        let mut data = b"thumbnail bytes".to_vec();
        let tag = encrypt_aes_gcm_detached(&mut data, &key, &nonce).unwrap();
        assert_ne!(data, b"thumbnail bytes");
        decrypt_aes_gcm_detached(&mut data, &key, &nonce, &tag).unwrap();
        assert_eq!(data, b"thumbnail bytes");
    }

    #[test]
    fn test_wrong_tag_rejected() {
        let key = generate_symmetric_key();
        let nonce = generate_nonce();
        let mut data = b"payload".to_vec();
        let mut tag = encrypt_aes_gcm_detached(&mut data, &key, &nonce).unwrap();
        tag[0] ^= 0x01;
        assert!(matches!(
            decrypt_aes_gcm_detached(&mut data, &key, &nonce, &tag),
            Err(CipherError::Authentication)
        ));
    }

    #[test]
    fn test_buffer_emits_everything_on_finish() {
        let key = generate_symmetric_key();
        let nonce = generate_nonce();
        let mut enc = AesGcmBuffer::new(&key, &nonce);
        enc.absorb(b"first ");
        enc.absorb(b"second");
        let (ciphertext, tag) = enc.finish_encrypt().unwrap();
        assert_eq!(ciphertext.len(), 12);

        let mut dec = AesGcmBuffer::new(&key, &nonce);
        dec.absorb(&ciphertext[..5]);
        dec.absorb(&ciphertext[5..]);
        assert_eq!(dec.finish_decrypt(&tag).unwrap(), b"first second");
    }
}
