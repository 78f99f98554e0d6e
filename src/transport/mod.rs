//! Outbound HTTP for beacons and the vendor script.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// A GET issued on behalf of a visitor. The visitor's headers are forwarded
/// so the collector attributes the hit to the browser, not to this service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BeaconRequest {
    pub url: String,
    pub user_agent: Option<String>,
    pub accept_language: Option<String>,
    pub remote_address: Option<String>,
}

impl BeaconRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch the URL and return the response body.
    async fn get(&self, request: &BeaconRequest) -> TransportResult<String>;
}

/// [`Transport`] backed by a shared reqwest client.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("utm-relay/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client for beacon delivery")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, request: &BeaconRequest) -> TransportResult<String> {
        let mut builder = self.client.get(&request.url);
        if let Some(user_agent) = request.user_agent.as_deref().filter(|ua| !ua.is_empty()) {
            builder = builder.header(reqwest::header::USER_AGENT, user_agent);
        }
        if let Some(language) = request.accept_language.as_deref().filter(|l| !l.is_empty()) {
            builder = builder.header(reqwest::header::ACCEPT_LANGUAGE, language);
        }
        if let Some(address) = request.remote_address.as_deref().filter(|a| !a.is_empty()) {
            builder = builder.header("x-forwarded-for", address);
        }

        let response = builder.send().await?;
        let status = response.status();
        debug!(url = %request.url, status = status.as_u16(), "beacon transport response");
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        Ok(response.text().await?)
    }
}
