//! Retrieval of one object from the content store into the local cache.
//!
//! The body is streamed into a work file (through `StreamDecipher` when a
//! plaintext copy is wanted) and renamed to its final name only once the
//! transfer, and the tag check, succeeded.

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::{Response, StatusCode};
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;

use super::client::StoreClient;
use crate::config::FetcherConfig;
use crate::crypto::{KeyMaterial, StreamDecipher};
use crate::error::StagingError;

/// One fetch job, fully resolved to paths by the cache layout.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub id: String,
    /// Final location of the cached object.
    pub destination: PathBuf,
    /// Transient location written during the transfer.
    pub work_path: PathBuf,
    pub key: Option<KeyMaterial>,
    /// Pipe the body through `StreamDecipher` before it reaches disk.
    pub decrypt: bool,
    /// Budget for "not found yet" retries.
    pub timeout: Duration,
}

/// Anything able to materialize a [`FetchRequest`] on disk.
///
/// `ContentFetcher` is the production implementation; the cache manager is
/// generic over this so tests can count and script invocations.
pub trait ContentSource: Send + Sync + 'static {
    fn fetch(
        &self,
        request: &FetchRequest,
    ) -> impl Future<Output = Result<PathBuf, StagingError>> + Send;
}

pub struct ContentFetcher {
    client: StoreClient,
    config: FetcherConfig,
}

impl ContentFetcher {
    pub fn new(client: StoreClient, config: FetcherConfig) -> Self {
        Self { client, config }
    }

    pub fn from_config(store_url: &str, config: FetcherConfig) -> Self {
        Self::new(StoreClient::new(store_url, &config), config)
    }

    async fn fetch_inner(&self, request: &FetchRequest) -> Result<PathBuf, StagingError> {
        let key = match (request.decrypt, &request.key) {
            (true, None) => return Err(StagingError::MissingKey(request.id.clone())),
            (true, Some(key)) => Some(key),
            (false, _) => None,
        };
        let deadline = Instant::now() + request.timeout;

        let response = self.wait_until_available(&request.id, deadline).await?;
        if let Err(e) = self.download(request, response, key).await {
            remove_work_file(&request.work_path).await;
            return Err(e);
        }
        commit(request).await
    }

    /// GET until the store has the object, retrying on 404 while the budget lasts.
    async fn wait_until_available(
        &self,
        id: &str,
        deadline: Instant,
    ) -> Result<Response, StagingError> {
        let mut attempt = 1u32;
        loop {
            let response = self
                .client
                .get(id)
                .await
                .map_err(|e| fetch_error(id, &e))?;
            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if status == StatusCode::NOT_FOUND && remaining > self.config.retry_guard {
                let pause = self.config.retry_backoff.min(remaining);
                log::debug!(
                    "{} not available yet (attempt {}), retrying in {}ms",
                    id,
                    attempt,
                    pause.as_millis()
                );
                tokio::time::sleep(pause).await;
                attempt += 1;
                continue;
            }

            return Err(StagingError::Fetch {
                id: id.to_string(),
                status: Some(status.as_u16()),
                message: format!("content store answered {}", status),
            });
        }
    }

    async fn download(
        &self,
        request: &FetchRequest,
        mut response: Response,
        key: Option<&KeyMaterial>,
    ) -> Result<(), StagingError> {
        let id = request.id.as_str();
        let work_path = request.work_path.as_path();
        if let Some(parent) = work_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StagingError::io(parent, &e))?;
        }

        let mut decipher = key
            .map(StreamDecipher::open)
            .transpose()
            .map_err(|e| StagingError::from_cipher(id, e))?;
        let mut file = tokio::fs::File::create(work_path)
            .await
            .map_err(|e| StagingError::io(work_path, &e))?;

        while let Some(chunk) = response.chunk().await.map_err(|e| fetch_error(id, &e))? {
            let out = match decipher.as_mut() {
                Some(d) => d
                    .update(&chunk)
                    .map_err(|e| StagingError::from_cipher(id, e))?,
                None => chunk.to_vec(),
            };
            file.write_all(&out)
                .await
                .map_err(|e| StagingError::io(work_path, &e))?;
        }

        if let Some(d) = decipher {
            let trailing = d.finalize().map_err(|e| StagingError::from_cipher(id, e))?;
            file.write_all(&trailing)
                .await
                .map_err(|e| StagingError::io(work_path, &e))?;
        }
        file.flush()
            .await
            .map_err(|e| StagingError::io(work_path, &e))?;
        Ok(())
    }
}

impl ContentSource for ContentFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<PathBuf, StagingError> {
        let result = self.fetch_inner(request).await;
        match &result {
            Ok(path) => log::info!("Fetched {} to {}", request.id, path.display()),
            Err(e) => log::warn!("Fetch of {} failed: {}", request.id, e),
        }
        result
    }
}

/// Move the work file to its final name. An existing final file means a
/// concurrent identical fetch won the race; that still counts as success.
async fn commit(request: &FetchRequest) -> Result<PathBuf, StagingError> {
    let destination = request.destination.as_path();
    if tokio::fs::try_exists(destination).await.unwrap_or(false) {
        log::debug!(
            "{} already present at {}, discarding duplicate download",
            request.id,
            destination.display()
        );
        remove_work_file(&request.work_path).await;
        return Ok(request.destination.clone());
    }

    if let Some(parent) = destination.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            remove_work_file(&request.work_path).await;
            return Err(StagingError::io(parent, &e));
        }
    }
    if let Err(e) = tokio::fs::rename(&request.work_path, destination).await {
        remove_work_file(&request.work_path).await;
        return Err(StagingError::io(destination, &e));
    }
    Ok(request.destination.clone())
}

/// Best-effort removal; a missing file is fine.
pub(crate) async fn remove_work_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => log::warn!("Could not remove work file {}: {}", path.display(), e),
    }
}

fn fetch_error(id: &str, err: &reqwest::Error) -> StagingError {
    StagingError::Fetch {
        id: id.to_string(),
        status: err.status().map(|s| s.as_u16()),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::pipeline::tests::sealed;
    use crate::crypto::CipherFormat;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(server: &MockServer, backoff: Duration) -> ContentFetcher {
        let config = FetcherConfig {
            retry_backoff: backoff,
            retry_guard: Duration::from_millis(50),
            ..FetcherConfig::default()
        };
        ContentFetcher::from_config(&server.uri(), config)
    }

    fn request(dir: &TempDir, id: &str, dest: &str, key: Option<KeyMaterial>) -> FetchRequest {
        FetchRequest {
            id: id.to_string(),
            destination: dir.path().join(dest),
            work_path: dir.path().join("work").join(id),
            decrypt: key.is_some(),
            key,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_ciphertext_is_cached_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/obj1"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"opaque ciphertext".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let req = request(&dir, "obj1", "chiffre/obj1", None);
        let path = fetcher(&server, Duration::from_millis(100))
            .fetch(&req)
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("chiffre/obj1"));
        assert_eq!(std::fs::read(&path).unwrap(), b"opaque ciphertext");
        assert!(!req.work_path.exists());
    }

    #[tokio::test]
    async fn test_not_found_then_available_is_decrypted() {
        let plaintext = b"jpeg bytes, pretend".repeat(5000);
        let (ciphertext, key) = sealed(&plaintext);

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/abc123"))
            .respond_with(ResponseTemplate::new(404))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(ciphertext))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let req = request(&dir, "abc123", "dechiffre/abc123.jpg", Some(key));
        let path = fetcher(&server, Duration::from_secs(1))
            .fetch(&req)
            .await
            .unwrap();

        assert!(path.ends_with("abc123.jpg"));
        assert_eq!(std::fs::read(&path).unwrap(), plaintext);
    }

    #[tokio::test]
    async fn test_other_status_fails_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let req = request(&dir, "obj2", "chiffre/obj2", None);
        let err = fetcher(&server, Duration::from_millis(10))
            .fetch(&req)
            .await
            .unwrap_err();

        assert!(matches!(err, StagingError::Fetch { status: Some(500), .. }));
        assert!(!req.work_path.exists());
        assert!(!req.destination.exists());
    }

    #[tokio::test]
    async fn test_not_found_gives_up_when_budget_is_spent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let mut req = request(&dir, "late", "chiffre/late", None);
        req.timeout = Duration::from_millis(300);
        let err = fetcher(&server, Duration::from_millis(100))
            .fetch(&req)
            .await
            .unwrap_err();

        assert!(matches!(err, StagingError::Fetch { status: Some(404), .. }));
        let attempts = server.received_requests().await.unwrap().len();
        assert!(attempts >= 2, "expected retries, got {}", attempts);
    }

    #[tokio::test]
    async fn test_tampered_tag_leaves_no_file() {
        let (ciphertext, key) = sealed(b"secret media");
        let mut tag = *key.tag().unwrap();
        tag[0] ^= 1;
        let bad_key = KeyMaterial::new(*key.key(), *key.nonce(), Some(tag), CipherFormat::default());

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(ciphertext))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let req = request(&dir, "obj3", "dechiffre/obj3.bin", Some(bad_key));
        let err = fetcher(&server, Duration::from_millis(10))
            .fetch(&req)
            .await
            .unwrap_err();

        assert_eq!(err, StagingError::Authentication { id: "obj3".into() });
        assert!(!req.work_path.exists());
        assert!(!req.destination.exists());
    }

    #[tokio::test]
    async fn test_existing_destination_counts_as_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"second copy".to_vec()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let req = request(&dir, "obj4", "chiffre/obj4", None);
        std::fs::create_dir_all(dir.path().join("chiffre")).unwrap();
        std::fs::write(&req.destination, b"first copy").unwrap();

        let path = fetcher(&server, Duration::from_millis(10))
            .fetch(&req)
            .await
            .unwrap();

        assert_eq!(std::fs::read(path).unwrap(), b"first copy");
        assert!(!req.work_path.exists());
    }

    #[tokio::test]
    async fn test_decrypt_without_key_is_rejected() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let mut req = request(&dir, "obj5", "dechiffre/obj5.bin", None);
        req.decrypt = true;

        let err = fetcher(&server, Duration::from_millis(10))
            .fetch(&req)
            .await
            .unwrap_err();
        assert_eq!(err, StagingError::MissingKey("obj5".into()));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    /// Serves one response whose body trickles out a byte at a time.
    async fn trickling_server(body: &'static [u8], pause: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = [0u8; 1024];
            let _ = socket.read(&mut head).await;
            let status = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(status.as_bytes()).await.unwrap();
            for byte in body {
                tokio::time::sleep(pause).await;
                if socket.write_all(&[*byte]).await.is_err() {
                    return;
                }
            }
            let _ = socket.shutdown().await;
        });
        format!("http://{}", addr)
    }

    fn idle_limited(url: &str, read_timeout: Duration) -> ContentFetcher {
        let config = FetcherConfig {
            read_timeout,
            ..FetcherConfig::default()
        };
        ContentFetcher::from_config(url, config)
    }

    #[tokio::test]
    async fn test_slow_body_outlasting_read_timeout_completes() {
        let url = trickling_server(b"0123456789", Duration::from_millis(100)).await;
        let dir = TempDir::new().unwrap();
        let mut req = request(&dir, "big", "chiffre/big", None);
        req.timeout = Duration::from_secs(30);

        let path = idle_limited(&url, Duration::from_millis(500))
            .fetch(&req)
            .await
            .unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn test_stalled_body_fails_and_cleans_up() {
        let url = trickling_server(b"01", Duration::from_secs(2)).await;
        let dir = TempDir::new().unwrap();
        let req = request(&dir, "stuck", "chiffre/stuck", None);

        let err = idle_limited(&url, Duration::from_millis(200))
            .fetch(&req)
            .await
            .unwrap_err();
        assert!(matches!(err, StagingError::Fetch { .. }), "{:?}", err);
        assert!(!req.destination.exists());
        assert!(!req.work_path.exists());
    }
}
