//! Local staging cache for encrypted media.
//!
//! Objects are fetched from a remote content store at most once per
//! ContentId, optionally decrypted on the way to disk, and handed to
//! downstream processors until they expire. Derived artifacts are
//! re-encrypted for a set of recipients before upload.

pub mod cache;
pub mod collab;
pub mod config;
pub mod crypto;
pub mod error;
pub mod job;
pub mod mimetype;
pub mod staging;
pub mod store;

pub use cache::{read_decrypted, AwaitOutcome, CacheEntry, CacheManager, EntryState, RequestOptions};
pub use config::{FetcherConfig, StagingConfig};
pub use error::StagingError;
