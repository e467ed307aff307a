// Remote metric source availability

use crate::config::RemoteSettings;
use crate::errors::RemoteError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// A remote metric source the remote check pipeline depends on
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Whether the source answers right now
    async fn is_available(&self) -> Result<bool, RemoteError>;
}

/// Graphite-compatible HTTP source probed with a render request
pub struct HttpRemoteSource {
    client: reqwest::Client,
    url: String,
}

impl HttpRemoteSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::InvalidConfiguration(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl RemoteSource for HttpRemoteSource {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn is_available(&self) -> Result<bool, RemoteError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("target", "NonExistingTarget"), ("format", "json")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, "Remote source answered with an error status");
            return Ok(false);
        }

        debug!("Remote source is available");
        Ok(true)
    }
}

/// Resolves the remote source, if one is configured for this process
#[derive(Clone, Default)]
pub struct RemoteSourceProvider {
    remote: Option<Arc<dyn RemoteSource>>,
}

impl RemoteSourceProvider {
    /// Provider without a remote source; the remote pipeline stays disabled
    pub fn disabled() -> Self {
        Self { remote: None }
    }

    pub fn with_remote(remote: Arc<dyn RemoteSource>) -> Self {
        Self {
            remote: Some(remote),
        }
    }

    /// Build the provider from settings
    pub fn from_settings(settings: &RemoteSettings) -> Result<Self, RemoteError> {
        if !settings.enabled || settings.url.is_empty() {
            return Ok(Self::disabled());
        }
        let source = HttpRemoteSource::new(
            settings.url.clone(),
            Duration::from_secs(settings.timeout_seconds),
        )?;
        Ok(Self::with_remote(Arc::new(source)))
    }

    /// The one-time remote probe: fails when no remote source is configured
    pub fn get_remote(&self) -> Result<Arc<dyn RemoteSource>, RemoteError> {
        self.remote.clone().ok_or(RemoteError::NotConfigured)
    }
}
