//! reqwest-backed `Network` implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::Network;
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::http::{Headers, Request, Response};

/// HTTP client used for every worker fetch.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpNetwork {
    client: Client,
}

impl HttpNetwork {
    /// Client without a request timeout; failures come from the network stack.
    pub fn new() -> Result<Self> {
        Self::build(None)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        Self::build(Some(timeout))
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::build(config.request_timeout_secs.map(Duration::from_secs))
    }

    fn build(timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| CacheError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        let mut builder = self
            .client
            .request(request.method().clone(), request.url().clone());
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();

        let mut headers = Headers::new();
        for (name, value) in response.headers() {
            match value.to_str() {
                Ok(value) => {
                    headers.insert(name.as_str().to_string(), value.to_string());
                }
                Err(_) => debug!(header = %name, "Skipping non-ASCII response header"),
            }
        }

        let body = response.bytes().await?.to_vec();
        debug!(url = %request.url(), status, bytes = body.len(), "Network fetch complete");

        Ok(Response::from_parts(status, headers, body))
    }
}
