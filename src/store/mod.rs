//! Remote content store access.

pub mod client;
pub mod fetcher;

pub use client::StoreClient;
pub use fetcher::{ContentFetcher, ContentSource, FetchRequest};
