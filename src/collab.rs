//! Seams to the services around the cache: the key service and the directory
//! of recipients that re-encrypted output is wrapped for.

use std::collections::BTreeMap;

use crate::crypto::{KeyMaterial, RecipientKey};
use crate::error::StagingError;

/// Opaque request context forwarded to the key service (domain, job type,
/// caller attributes).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyContext {
    pub domain: String,
    pub attributes: BTreeMap<String, String>,
}

impl KeyContext {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

/// Answer of the key service for one ContentId.
#[derive(Debug, Clone)]
pub enum KeyResolution {
    Key(KeyMaterial),
    AccessDenied(String),
    /// Another worker already owns the job for this target.
    Duplicate,
}

/// Resolves the key material of a ContentId.
///
/// `Err` is reserved for transport failures; refusals are `AccessDenied`.
#[allow(async_fn_in_trait)]
pub trait KeyProvider {
    async fn resolve_key(
        &self,
        id: &str,
        context: &KeyContext,
    ) -> Result<KeyResolution, StagingError>;
}

/// Supplies the public keys processed output is re-encrypted for.
#[allow(async_fn_in_trait)]
pub trait RecipientDirectory {
    async fn recipients(&self) -> Result<Vec<RecipientKey>, StagingError>;
}

/// Fixed recipient list, e.g. from the command line.
#[derive(Debug, Clone, Default)]
pub struct StaticRecipients(pub Vec<RecipientKey>);

impl RecipientDirectory for StaticRecipients {
    async fn recipients(&self) -> Result<Vec<RecipientKey>, StagingError> {
        Ok(self.0.clone())
    }
}
