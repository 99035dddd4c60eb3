//! The HTTP client the dispatcher talks through. Connection pooling, TLS, DNS and request
//! timeouts all live behind [HttpTransport].

use bytes::Bytes;
use http::{HeaderMap, StatusCode};

use crate::config::SinkConfig;
use crate::error::TransportError;
use crate::{Error, Result};

/// An HTTP response, whatever its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Capability to POST a body and get back a response or a transport-level failure.
#[trait_variant::make(HttpTransport: Send)]
#[allow(dead_code)]
pub trait LocalHttpTransport {
    /// Sends `body` to `url`. An `Err` means no response was received at all.
    async fn post(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> std::result::Result<TransportResponse, TransportError>;
}

/// [HttpTransport] backed by a pooled [reqwest::Client].
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Client with the request timeout from `config` and an idle pool sized to `pool_max`.
    pub fn new(config: &SinkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(config.pool_max)
            .build()
            .map_err(|e| Error::Config(format!("building HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl HttpTransport for ReqwestTransport {
    async fn post(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> std::result::Result<TransportResponse, TransportError> {
        let response = self
            .client
            .post(url)
            .headers(headers.clone())
            .body(body)
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;
        Ok(TransportResponse { status, body })
    }
}
