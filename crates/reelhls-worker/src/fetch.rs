//! Source video download.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::env_parse;
use crate::error::FetchError;
use crate::retry::{retry_async_when, RetryConfig, RetryResult};

/// Default payload limit (2 GiB).
pub const DEFAULT_MAX_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Retrieves a job's source into a local file.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Download `url` into `dest`, returning the number of bytes written.
    ///
    /// On error no partial file is left at `dest`.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchError>;
}

/// Download settings.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Connect timeout, and the longest the body may go without delivering data
    pub timeout: Duration,
    /// Largest accepted payload
    pub max_bytes: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Backoff base; retry `n` waits `base_delay * 2^n`
    pub base_delay: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_bytes: DEFAULT_MAX_BYTES,
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl FetchConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            timeout: env_parse("FETCH_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_bytes: env_parse("FETCH_MAX_BYTES").unwrap_or(defaults.max_bytes),
            max_retries: env_parse("FETCH_MAX_RETRIES").unwrap_or(defaults.max_retries),
            base_delay: defaults.base_delay,
        }
    }
}

/// Streaming HTTP(S) fetcher.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

impl HttpFetcher {
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .user_agent(concat!("reelhls/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, config })
    }

    async fn attempt(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        let result = self.download(url, dest).await;
        if result.is_err() {
            remove_partial(dest).await;
        }
        result
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        let limit = self.config.max_bytes;
        let response = tokio::time::timeout(self.config.timeout, self.client.get(url).send())
            .await
            .map_err(|_| FetchError::Stalled(self.config.timeout.as_secs()))??;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        if let Some(size) = response.content_length() {
            if size > limit {
                return Err(FetchError::TooLarge { size, limit });
            }
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut received = 0u64;

        loop {
            let next = tokio::time::timeout(self.config.timeout, stream.next())
                .await
                .map_err(|_| FetchError::Stalled(self.config.timeout.as_secs()))?;
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;

            received += chunk.len() as u64;
            if received > limit {
                return Err(FetchError::TooLarge { size: received, limit });
            }
            file.write_all(&chunk).await?;
        }

        file.flush().await?;
        Ok(received)
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        let retry = RetryConfig::new("source_download")
            .with_max_retries(self.config.max_retries)
            .with_base_delay(self.config.base_delay);

        match retry_async_when(&retry, || self.attempt(url, dest), FetchError::is_transient).await {
            RetryResult::Success(bytes) => {
                info!(url, bytes, "Downloaded source");
                Ok(bytes)
            }
            RetryResult::Failed { error, attempts } => {
                warn!(url, attempts, "Source download failed: {}", error);
                Err(error)
            }
        }
    }
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed partial download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "Failed to remove partial download: {}", e),
    }
}
