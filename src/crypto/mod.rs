//! Streaming authenticated cipher pipeline.
//!
//! - `StreamCipher`: fresh key per object, chunked encryption, tag + plaintext
//!   hash on finalize, key wrapped for every recipient (ECIES/secp256k1)
//! - `StreamDecipher`: chunked decryption, fail-closed tag verification
//!
//! Two AEAD formats are supported: ChaCha20-Poly1305 (streams in both
//! directions) and AES-256-GCM (buffers until finalize).

pub mod aead;
pub mod aes;
mod chacha;
pub mod cipher;
pub mod decipher;
pub mod ecies;
pub mod hash;
pub mod key;
pub mod pipeline;
pub mod utils;

pub use aead::CipherError;
pub use cipher::{CipherHeader, CipherResult, KeyRegistration, StreamCipher};
pub use decipher::StreamDecipher;
pub use ecies::{unwrap_key, wrap_key, RecipientKey};
pub use hash::{content_hash, ContentHasher};
pub use key::{CipherFormat, KeyMaterial};
pub use pipeline::{decrypt_in_memory, decrypt_stream, encrypt_in_memory, encrypt_stream};
