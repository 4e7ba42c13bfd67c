//! Async pipeline helpers wiring the stream ciphers between readers and writers.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::aead::CipherError;
use super::cipher::{CipherResult, StreamCipher};
use super::decipher::StreamDecipher;
use super::ecies::RecipientKey;
use super::key::{CipherFormat, KeyMaterial};

/// Read size for pipeline stages.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Encrypt everything from `reader` into `writer`.
pub async fn encrypt_stream<R, W>(
    reader: &mut R,
    writer: &mut W,
    recipients: &[RecipientKey],
    format: CipherFormat,
) -> Result<CipherResult, CipherError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut cipher = StreamCipher::open_with_format(recipients, format)?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let out = cipher.update(&buf[..n])?;
        if !out.is_empty() {
            writer.write_all(&out).await?;
        }
    }
    let result = cipher.finalize()?;
    writer.write_all(&result.final_chunk).await?;
    writer.flush().await?;
    Ok(result)
}

/// Decrypt everything from `reader` into `writer`, returning the plaintext size.
///
/// On `Err`, bytes already written to `writer` are unauthenticated and must be
/// discarded by the caller.
pub async fn decrypt_stream<R, W>(
    reader: &mut R,
    writer: &mut W,
    key: &KeyMaterial,
) -> Result<u64, CipherError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut decipher = StreamDecipher::open(key)?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut written = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let out = decipher.update(&buf[..n])?;
        if !out.is_empty() {
            writer.write_all(&out).await?;
            written += out.len() as u64;
        }
    }
    let trailing = decipher.finalize()?;
    writer.write_all(&trailing).await?;
    writer.flush().await?;
    Ok(written + trailing.len() as u64)
}

/// Encrypt a small in-memory payload.
pub fn encrypt_in_memory(
    plaintext: &[u8],
    recipients: &[RecipientKey],
    format: CipherFormat,
) -> Result<(Vec<u8>, CipherResult), CipherError> {
    let mut cipher = StreamCipher::open_with_format(recipients, format)?;
    let mut ciphertext = cipher.update(plaintext)?;
    let result = cipher.finalize()?;
    ciphertext.extend_from_slice(&result.final_chunk);
    Ok((ciphertext, result))
}

/// Decrypt a small in-memory payload. Nothing is returned unless the tag verifies.
pub fn decrypt_in_memory(ciphertext: &[u8], key: &KeyMaterial) -> Result<Vec<u8>, CipherError> {
    let mut decipher = StreamDecipher::open(key)?;
    let mut plaintext = decipher.update(ciphertext)?;
    let trailing = decipher.finalize()?;
    plaintext.extend_from_slice(&trailing);
    Ok(plaintext)
}
