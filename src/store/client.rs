//! HTTP client for the remote content store.

use reqwest::{Client, Response};

use crate::config::FetcherConfig;

/// Thin wrapper over `reqwest::Client` that knows the store's base URL.
#[derive(Clone)]
pub struct StoreClient {
    client: Client,
    base_url: String,
}

impl StoreClient {
    pub fn new(base_url: &str, config: &FetcherConfig) -> Self {
        let client = Client::builder()
            .read_timeout(config.read_timeout)
            .connect_timeout(config.connect_timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("Falling back to default HTTP client: {}", e);
                Client::new()
            });
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// `<base_url>/<id>`, with the id percent-encoded.
    pub fn content_url(&self, id: &str) -> String {
        format!("{}/{}", self.base_url, urlencoding::encode(id))
    }

    /// GET the object. Non-success statuses are returned as responses.
    pub async fn get(&self, id: &str) -> Result<Response, reqwest::Error> {
        self.client.get(self.content_url(id)).send().await
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_url_encodes_id() {
        let client = StoreClient::new("http://store.local/files/", &FetcherConfig::default());
        assert_eq!(client.base_url(), "http://store.local/files");
        assert_eq!(client.content_url("abc123"), "http://store.local/files/abc123");
        assert_eq!(
            client.content_url("a b?c"),
            "http://store.local/files/a%20b%3Fc"
        );
    }
}
