//! Resource fetching for snapshots and URL-backed replay.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("{url} timed out after {ms}ms")]
    Timeout { url: String, ms: u64 },
    #[error("{url} is unavailable: {reason}")]
    Unavailable { url: String, reason: String },
}

/// Source of external resource text.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch_text(&self, url: &Url) -> Result<String, FetchError>;
}

/// reqwest-backed fetcher (rustls).
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("pagetape/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResourceFetcher for HttpFetcher {
    async fn fetch_text(&self, url: &Url) -> Result<String, FetchError> {
        let http_err = |source| FetchError::Http {
            url: url.to_string(),
            source,
        };
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(http_err)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(http_err)
    }
}

/// Fetcher for contexts without network access; every fetch fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineFetcher;

#[async_trait]
impl ResourceFetcher for OfflineFetcher {
    async fn fetch_text(&self, url: &Url) -> Result<String, FetchError> {
        Err(FetchError::Unavailable {
            url: url.to_string(),
            reason: "offline".to_string(),
        })
    }
}
