// src/client.rs

//! Shared HTTP client with proxy support and bounded retries.
//!
//! A thin wrapper over reqwest. GET requests are retried with exponential
//! backoff on transport errors and 5xx responses; any other status is
//! returned to the caller untouched. Backoff sleeps observe the cancellation
//! token so shutdown is never blocked on a retry schedule.

use crate::error::{Error, Result};
use crate::fsutil;
use reqwest::{Client, Proxy, Response, Url};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default timeout for a single HTTP request
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of retries for transport or 5xx failures
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// User-Agent header sent with every request
pub const USER_AGENT: &str = concat!("terraform-mirror/", env!("CARGO_PKG_VERSION"));

/// Construction parameters for [`HttpClient`]
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Optional proxy URL; schemes `http`, `https` and `socks5` are accepted
    pub proxy_url: Option<String>,
    pub timeout: Duration,
    pub user_agent: String,
    pub max_retries: u32,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            proxy_url: None,
            timeout: DEFAULT_TIMEOUT,
            user_agent: USER_AGENT.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// HTTP client wrapper shared by the registry client and the binaries pass
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    max_retries: u32,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent);

        if let Some(proxy_url) = config.proxy_url.as_deref().filter(|p| !p.is_empty()) {
            let url = Url::parse(proxy_url)
                .map_err(|e| Error::ConfigInvalid(format!("invalid proxy URL '{proxy_url}': {e}")))?;
            match url.scheme() {
                "http" | "https" | "socks5" => {
                    let proxy = Proxy::all(url.as_str()).map_err(|e| {
                        Error::ConfigInvalid(format!("failed to configure proxy '{proxy_url}': {e}"))
                    })?;
                    builder = builder.proxy(proxy);
                }
                scheme => {
                    return Err(Error::ConfigInvalid(format!(
                        "unsupported proxy scheme '{scheme}'"
                    )));
                }
            }
        }

        let client = builder
            .build()
            .map_err(|e| Error::ConfigInvalid(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_retries: config.max_retries,
        })
    }

    /// GET with retry on transport errors and 5xx responses.
    ///
    /// Backoff between attempts is `2^i` seconds. Non-5xx responses,
    /// including 4xx, are returned immediately; the caller maps the status.
    pub async fn get(&self, url: &str, cancel: &CancellationToken) -> Result<Response> {
        let mut last_err: Option<Error> = None;

        for attempt in 0..=self.max_retries {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match self.client.get(url).send().await {
                Ok(response) if response.status().as_u16() < 500 => return Ok(response),
                Ok(response) => {
                    let status = response.status().as_u16();
                    warn!("GET {url} returned {status} (attempt {})", attempt + 1);
                    last_err = Some(Error::Protocol(status));
                }
                Err(e) => {
                    warn!("GET {url} failed: {e} (attempt {})", attempt + 1);
                    last_err = Some(e.into());
                }
            }

            if attempt < self.max_retries {
                let backoff = Duration::from_secs(1u64 << attempt);
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                }
            }
        }

        Err(last_err.unwrap_or(Error::Other(format!("request to {url} failed"))))
    }

    /// Stream a URL into `dest_path` through the atomic-write protocol:
    /// parent mkdir, temp-file write, close, rename. A non-200 response
    /// fails before anything is written; a failure mid-stream removes the
    /// temp file.
    pub async fn download_to_path(
        &self,
        url: &str,
        dest_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        debug!("downloading {url} to {}", dest_path.display());

        let mut response = self.get(url, cancel).await?;
        if response.status().as_u16() != 200 {
            return Err(Error::Protocol(response.status().as_u16()));
        }

        fsutil::ensure_parent_dir(dest_path)?;
        let tmp = fsutil::tmp_path(dest_path);

        let write_result: Result<()> = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            while let Some(chunk) = response.chunk().await? {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            Ok(())
        }
        .await;

        if let Err(e) = write_result {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }

        fsutil::rename_into_place(&tmp, dest_path)
    }
}
