//! Re-encryption of derived artifacts (thumbnails, transcoded video) before
//! they are uploaded back to the content store.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::collab::RecipientDirectory;
use crate::crypto::utils::{bytes_to_hex, generate_random_bytes};
use crate::crypto::{
    encrypt_stream, CipherFormat, CipherResult, KeyMaterial, KeyRegistration, RecipientKey,
};
use crate::error::StagingError;

/// An encrypted artifact waiting for upload.
#[derive(Debug, Clone)]
pub struct StagedOutput {
    /// `<staging_dir>/<content hash>`.
    pub path: PathBuf,
    pub result: CipherResult,
}

impl StagedOutput {
    pub fn content_hash(&self) -> &str {
        &self.result.content_hash
    }

    pub fn registration(
        &self,
        domain: &str,
        identifiers: BTreeMap<String, String>,
    ) -> KeyRegistration {
        self.result.registration(domain, identifiers)
    }
}

/// Encrypt `source` for `recipients` into `staging_dir`, named after the
/// plaintext's content hash.
///
/// The source file is removed once the output is in place; on failure the
/// partial output is removed and the source is left alone.
pub async fn stage_output(
    source: &Path,
    recipients: &[RecipientKey],
    staging_dir: &Path,
) -> Result<StagedOutput, StagingError> {
    tokio::fs::create_dir_all(staging_dir)
        .await
        .map_err(|e| StagingError::io(staging_dir, &e))?;
    let partial = staging_dir.join(format!("{}.work", bytes_to_hex(&generate_random_bytes(8))));

    let staged = match encrypt_to(source, recipients, &partial).await {
        Ok(result) => {
            let path = staging_dir.join(&result.content_hash);
            match tokio::fs::rename(&partial, &path).await {
                Ok(()) => Ok(StagedOutput { path, result }),
                Err(e) => Err(StagingError::io(&path, &e)),
            }
        }
        Err(e) => Err(e),
    };

    match &staged {
        Ok(output) => {
            if let Err(e) = tokio::fs::remove_file(source).await {
                log::warn!("Could not remove staged source {}: {}", source.display(), e);
            }
            log::info!(
                "Staged {} as {} ({} bytes)",
                source.display(),
                output.content_hash(),
                output.result.ciphertext_size
            );
        }
        Err(e) => {
            log::warn!("Staging {} failed: {}", source.display(), e);
            if let Err(e) = tokio::fs::remove_file(&partial).await {
                if e.kind() != ErrorKind::NotFound {
                    log::warn!("Could not remove {}: {}", partial.display(), e);
                }
            }
        }
    }
    staged
}

/// `stage_output` for the recipients currently listed by `directory`.
pub async fn stage_for<D: RecipientDirectory>(
    source: &Path,
    directory: &D,
    staging_dir: &Path,
) -> Result<StagedOutput, StagingError> {
    let recipients = directory.recipients().await?;
    stage_output(source, &recipients, staging_dir).await
}

/// `stage_output` for an artifact derived from another object, readable by
/// the same recipients as the key that opened the source.
pub async fn stage_derived(
    source: &Path,
    source_key: &KeyMaterial,
    staging_dir: &Path,
) -> Result<StagedOutput, StagingError> {
    stage_output(source, source_key.recipients(), staging_dir).await
}

async fn encrypt_to(
    source: &Path,
    recipients: &[RecipientKey],
    destination: &Path,
) -> Result<CipherResult, StagingError> {
    let mut reader = tokio::fs::File::open(source)
        .await
        .map_err(|e| StagingError::io(source, &e))?;
    let mut writer = tokio::fs::File::create(destination)
        .await
        .map_err(|e| StagingError::io(destination, &e))?;
    encrypt_stream(&mut reader, &mut writer, recipients, CipherFormat::default())
        .await
        .map_err(|e| StagingError::Cipher(e.to_string()))
}
