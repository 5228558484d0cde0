//! HTTP transport abstraction
//!
//! The caching client talks to the network only through `HttpTransport`,
//! which sends one request and returns the fully buffered response.
//! Redirects, TLS and connection pooling belong to the implementation.

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response, Version};
use std::time::Duration;
use thiserror::Error;

/// Transport failure, classified by the phase that failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("failed to read response: {0}")]
    Read(String),
}

impl TransportError {
    /// Short phase label used in log fields
    pub fn phase(&self) -> &'static str {
        match self {
            TransportError::Protocol(_) => "protocol",
            TransportError::Connection(_) => "connect",
            TransportError::Read(_) => "read",
        }
    }
}

/// Sends a single HTTP request
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: Request<()>) -> Result<Response<Bytes>, TransportError>;
}

/// `reqwest`-backed transport used in production
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: Request<()>) -> Result<Response<Bytes>, TransportError> {
        let (parts, ()) = request.into_parts();
        let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        let mut outgoing = self.client.request(method, parts.uri.to_string());
        for (name, value) in parts.headers.iter() {
            outgoing = outgoing.header(name.as_str(), value.as_bytes());
        }

        let response = outgoing.send().await.map_err(classify)?;

        let mut builder = Response::builder()
            .status(response.status().as_u16())
            .version(map_version(response.version()));
        for (name, value) in response.headers() {
            builder = builder.header(name.as_str(), value.as_bytes());
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Read(e.to_string()))?;

        builder
            .body(body)
            .map_err(|e| TransportError::Protocol(e.to_string()))
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_connect() || err.is_timeout() || err.is_request() {
        TransportError::Connection(err.to_string())
    } else if err.is_body() || err.is_decode() {
        TransportError::Read(err.to_string())
    } else {
        TransportError::Protocol(err.to_string())
    }
}

fn map_version(version: reqwest::Version) -> Version {
    if version == reqwest::Version::HTTP_09 {
        Version::HTTP_09
    } else if version == reqwest::Version::HTTP_10 {
        Version::HTTP_10
    } else if version == reqwest::Version::HTTP_2 {
        Version::HTTP_2
    } else if version == reqwest::Version::HTTP_3 {
        Version::HTTP_3
    } else {
        Version::HTTP_11
    }
}
