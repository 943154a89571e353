//! Clip retrieval into locally scoped resources.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dayreel_common::{ReelError, ReelResult};
use futures_util::StreamExt;
use reqwest::Url;
use tokio::io::AsyncWriteExt;

use crate::resources::{LocalResource, ResourceLedger};

/// Retrieves the full binary content of a clip.
#[async_trait]
pub trait ClipFetcher: Send + Sync {
    /// Fetch `uri` into a local resource counted by `ledger`.
    ///
    /// Non-success responses, transport failures and interrupted
    /// transfers all fail with [`ReelError::Fetch`].
    async fn fetch(&self, uri: &str, ledger: &ResourceLedger) -> ReelResult<LocalResource>;

    /// Human-readable name of this fetcher.
    fn name(&self) -> &str;
}

/// Fetcher for `http`, `https` and `file` URIs.
///
/// Remote bodies are streamed into the scratch directory; local files are
/// copied there so every resource is released the same way.
pub struct HttpClipFetcher {
    client: reqwest::Client,
    scratch_dir: PathBuf,
}

impl HttpClipFetcher {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> ReelResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("dayreel/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ReelError::fetch(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            scratch_dir: scratch_dir.into(),
        })
    }

    /// Use a preconfigured client, e.g. one with custom timeouts or proxies.
    pub fn with_client(client: reqwest::Client, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            scratch_dir: scratch_dir.into(),
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    fn next_scratch_path(&self, url: &Url) -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let ext = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .filter(|ext| ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or("bin");
        self.scratch_dir
            .join(format!("clip-{}-{n}.{ext}", std::process::id()))
    }

    async fn ensure_scratch_dir(&self) -> ReelResult<()> {
        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|e| {
                ReelError::fetch(format!(
                    "cannot create scratch directory {}: {e}",
                    self.scratch_dir.display()
                ))
            })
    }

    async fn copy_local(
        &self,
        uri: &str,
        url: &Url,
        ledger: &ResourceLedger,
    ) -> ReelResult<LocalResource> {
        let source = url
            .to_file_path()
            .map_err(|_| ReelError::fetch(format!("invalid file URI: {uri}")))?;
        let mut input = tokio::fs::File::open(&source).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ReelError::fetch(format!("file not found: {}", source.display()))
            } else {
                ReelError::fetch(format!("cannot open {}: {e}", source.display()))
            }
        })?;

        let scratch = ScratchFile::new(self.next_scratch_path(url));
        let mut output = scratch.create().await?;
        let size = tokio::io::copy(&mut input, &mut output)
            .await
            .map_err(|e| ReelError::fetch(format!("failed to copy {}: {e}", source.display())))?;
        output
            .flush()
            .await
            .map_err(|e| ReelError::fetch(format!("write failed: {e}")))?;
        drop(output);

        Ok(LocalResource::file(ledger, uri, scratch.keep(), size))
    }

    async fn download(
        &self,
        uri: &str,
        url: Url,
        ledger: &ResourceLedger,
    ) -> ReelResult<LocalResource> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ReelError::fetch(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReelError::fetch(format!("HTTP {status}: {uri}")));
        }

        // Every early return below, and dropping this future mid-transfer,
        // deletes the partial file.
        let expected = response.content_length();
        let scratch = ScratchFile::new(self.next_scratch_path(&url));
        let mut file = scratch.create().await?;

        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| ReelError::fetch(format!("transfer interrupted: {e}")))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| ReelError::fetch(format!("write failed: {e}")))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| ReelError::fetch(format!("write failed: {e}")))?;
        drop(file);

        if let Some(expected) = expected {
            if written < expected {
                return Err(ReelError::fetch(format!(
                    "transfer interrupted after {written} of {expected} bytes"
                )));
            }
        }

        tracing::debug!(uri = %uri, bytes = written, "Clip downloaded");
        Ok(LocalResource::file(ledger, uri, scratch.keep(), written))
    }
}

/// A scratch file being filled. Removed on drop unless [`ScratchFile::keep`]
/// hands it to a [`LocalResource`].
struct ScratchFile {
    path: PathBuf,
    armed: bool,
}

impl ScratchFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    async fn create(&self) -> ReelResult<tokio::fs::File> {
        tokio::fs::File::create(&self.path).await.map_err(|e| {
            ReelError::fetch(format!("cannot create {}: {e}", self.path.display()))
        })
    }

    fn keep(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Partial download removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove partial download"
            ),
        }
    }
}

#[async_trait]
impl ClipFetcher for HttpClipFetcher {
    async fn fetch(&self, uri: &str, ledger: &ResourceLedger) -> ReelResult<LocalResource> {
        let url = Url::parse(uri).map_err(|e| ReelError::fetch(format!("invalid URI {uri}: {e}")))?;
        match url.scheme() {
            "http" | "https" => {
                self.ensure_scratch_dir().await?;
                self.download(uri, url, ledger).await
            }
            "file" => {
                self.ensure_scratch_dir().await?;
                self.copy_local(uri, &url, ledger).await
            }
            other => Err(ReelError::fetch(format!("unsupported URI scheme: {other}"))),
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("dayreel-fetch-{name}-{}", std::process::id()))
    }

    fn http_fetcher(root: &Path) -> HttpClipFetcher {
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        HttpClipFetcher::with_client(client, root)
    }

    fn leftover_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
            .unwrap_or_default()
    }

    /// Answer one request with `head` and `body`. With `hold`, the
    /// connection stays open afterwards instead of closing.
    async fn serve_once(head: String, body: Vec<u8>, hold: bool) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 2048];
            let _ = socket.read(&mut request).await;
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(&body).await.unwrap();
            socket.flush().await.unwrap();
            if hold {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
        });
        format!("http://{addr}/clips/day-1.mp4")
    }

    fn ok_head(content_length: usize) -> String {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: video/mp4\r\nContent-Length: {content_length}\r\nConnection: close\r\n\r\n"
        )
    }

    #[tokio::test]
    async fn test_http_body_is_streamed_into_scratch() {
        let root = scratch("http-ok");
        let body = vec![7u8; 4096];
        let uri = serve_once(ok_head(body.len()), body, false).await;

        let ledger = ResourceLedger::new();
        let resource = http_fetcher(&root).fetch(&uri, &ledger).await.unwrap();
        let path = resource.path().unwrap().to_path_buf();
        assert_eq!(resource.size_bytes(), 4096);
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("mp4"));
        assert_eq!(std::fs::read(&path).unwrap().len(), 4096);
        assert_eq!(ledger.outstanding(), 1);

        resource.release();
        assert!(leftover_files(&root).is_empty());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn test_http_error_status_is_a_fetch_error() {
        let root = scratch("http-404");
        let head = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
        let uri = serve_once(head.to_string(), Vec::new(), false).await;

        let ledger = ResourceLedger::new();
        let err = http_fetcher(&root).fetch(&uri, &ledger).await.unwrap_err();
        assert_eq!(err.phase(), "fetch");
        assert!(err.to_string().contains("404"), "{err}");
        assert_eq!(ledger.allocated(), 0);
        assert!(leftover_files(&root).is_empty());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn test_truncated_body_removes_partial_file() {
        let root = scratch("http-short");
        let uri = serve_once(ok_head(100_000), vec![1u8; 10], false).await;

        let ledger = ResourceLedger::new();
        let err = http_fetcher(&root).fetch(&uri, &ledger).await.unwrap_err();
        assert_eq!(err.phase(), "fetch");
        assert!(err.to_string().contains("interrupted"), "{err}");
        assert_eq!(ledger.allocated(), 0);
        assert!(leftover_files(&root).is_empty());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn test_abandoned_transfer_removes_partial_file() {
        let root = scratch("http-stall");
        let uri = serve_once(ok_head(100_000), vec![1u8; 10], true).await;

        let ledger = ResourceLedger::new();
        let fetcher = http_fetcher(&root);
        let stalled =
            tokio::time::timeout(Duration::from_millis(300), fetcher.fetch(&uri, &ledger)).await;
        assert!(stalled.is_err());
        assert_eq!(ledger.allocated(), 0);
        assert!(leftover_files(&root).is_empty(), "{:?}", leftover_files(&root));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn test_file_uri_is_copied_into_scratch() {
        let root = scratch("copy");
        std::fs::create_dir_all(&root).unwrap();
        let source = root.join("source.mp4");
        std::fs::write(&source, b"not really a video").unwrap();

        let fetcher = HttpClipFetcher::new(root.join("scratch")).unwrap();
        let ledger = ResourceLedger::new();
        let uri = Url::from_file_path(&source).unwrap().to_string();
        let resource = fetcher.fetch(&uri, &ledger).await.unwrap();

        let path = resource.path().unwrap().to_path_buf();
        assert!(path.starts_with(root.join("scratch")));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("mp4"));
        assert_eq!(resource.size_bytes(), 18);
        assert!(source.exists());

        resource.release();
        assert!(!path.exists());
        assert_eq!(ledger.outstanding(), 0);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn test_missing_file_is_a_fetch_error() {
        let fetcher = HttpClipFetcher::new(scratch("missing")).unwrap();
        let ledger = ResourceLedger::new();
        let err = fetcher
            .fetch("file:///nonexistent/dayreel/clip.mp4", &ledger)
            .await
            .unwrap_err();
        assert_eq!(err.phase(), "fetch");
        assert_eq!(ledger.allocated(), 0);
    }

    #[tokio::test]
    async fn test_unknown_scheme_is_rejected() {
        let fetcher = HttpClipFetcher::new(scratch("scheme")).unwrap();
        let err = fetcher
            .fetch("ftp://example.com/clip.mp4", &ResourceLedger::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unsupported URI scheme"));
    }

    #[tokio::test]
    async fn test_garbage_uri_is_rejected() {
        let fetcher = HttpClipFetcher::new(scratch("garbage")).unwrap();
        let err = fetcher
            .fetch("not a uri", &ResourceLedger::new())
            .await
            .unwrap_err();
        assert_eq!(err.phase(), "fetch");
    }
}
