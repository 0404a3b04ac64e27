use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_USER_AGENT: &str = "subreader/0.1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// A fetched document: its declared content type and raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub content_type: String,
    pub body: Vec<u8>,
}

/// Outbound HTTP as seen by the rest of the crate.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchResponse>;

    /// Whether the URL answers with a success status.
    async fn probe(&self, url: &str) -> bool;
}

/// [`Fetch`] over a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

fn fetch_error(url: &str, e: impl ToString) -> Error {
    Error::Fetch {
        url: url.to_string(),
        reason: e.to_string(),
    }
}

impl HttpFetcher {
    /// Builds the client with the configured user agent and timeout.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| fetch_error("<client>", e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_error(url, e))?;

        if !response.status().is_success() {
            return Err(fetch_error(url, format!("status {}", response.status())));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.bytes().await.map_err(|e| fetch_error(url, e))?;
        debug!("fetched {} ({}, {} bytes)", url, content_type, body.len());

        Ok(FetchResponse {
            content_type,
            body: body.to_vec(),
        })
    }

    async fn probe(&self, url: &str) -> bool {
        match self.client.head(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("probe of {} failed: {}", url, e);
                false
            }
        }
    }
}
