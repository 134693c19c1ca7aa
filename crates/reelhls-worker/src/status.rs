//! Terminal status callback.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use reelhls_models::StatusUpdate;

use crate::config::env_parse;
use crate::error::StatusCallbackError;
use crate::retry::{retry_async, RetryConfig, RetryResult};

/// Receives terminal job outcomes. Reporting never fails the caller.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn report(&self, update: &StatusUpdate);
}

/// Callback endpoint settings.
#[derive(Debug, Clone)]
pub struct StatusConfig {
    /// Endpoint URL; reporting is a no-op without one
    pub url: Option<String>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout: Duration::from_secs(10),
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl StatusConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("STATUS_CALLBACK_URL").ok().filter(|s| !s.trim().is_empty()),
            timeout: env_parse("STATUS_CALLBACK_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_retries: env_parse("STATUS_CALLBACK_MAX_RETRIES").unwrap_or(defaults.max_retries),
            base_delay: defaults.base_delay,
        }
    }
}

/// POSTs [`StatusUpdate`] JSON to the configured endpoint.
#[derive(Debug, Clone)]
pub struct HttpStatusReporter {
    client: reqwest::Client,
    config: StatusConfig,
}

impl HttpStatusReporter {
    pub fn new(config: StatusConfig) -> Result<Self, StatusCallbackError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    async fn post(&self, url: &str, update: &StatusUpdate) -> Result<(), StatusCallbackError> {
        let response = self.client.post(url).json(update).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StatusCallbackError::Status(status.as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl StatusSink for HttpStatusReporter {
    async fn report(&self, update: &StatusUpdate) {
        let Some(url) = self.config.url.as_deref() else {
            debug!(
                correlation_id = %update.correlation_id,
                status = update.status.as_str(),
                "No status callback configured"
            );
            return;
        };

        let retry = RetryConfig::new("status_callback")
            .with_max_retries(self.config.max_retries)
            .with_base_delay(self.config.base_delay);

        match retry_async(&retry, || self.post(url, update)).await {
            RetryResult::Success(()) => info!(
                correlation_id = %update.correlation_id,
                status = update.status.as_str(),
                "Status callback delivered"
            ),
            RetryResult::Failed { error, attempts } => warn!(
                correlation_id = %update.correlation_id,
                status = update.status.as_str(),
                attempts,
                "Status callback failed: {}", error
            ),
        }
    }
}
