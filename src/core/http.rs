//! HTTP transport.
//!
//! The scheduler talks to the network only through [`Transport`]. The
//! production implementation wraps a shared `reqwest` client; tests swap in
//! a scripted transport.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::header::{CONTENT_LENGTH, HeaderMap};
use reqwest::{Client, ClientBuilder, StatusCode};

use super::body::ByteStream;
use crate::error::{FetchqError, Result};

/// Default timeout for HTTP requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Request header list, in the order they are sent.
pub type Headers = Vec<(String, String)>;

/// A fully formed GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub uri: String,
    pub headers: Headers,
}

/// Status, headers and an unread body.
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

impl TransportResponse {
    /// Whether the status is in the 2xx range.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Canonical reason phrase for the status.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        StatusCode::from_u16(self.status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown")
    }
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Performs network I/O for the scheduler.
///
/// Dropping the returned future must be safe: the scheduler races it
/// against the request's cancellation token.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send a GET request and return once response headers arrive.
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse>;
}

/// Build a configured HTTP client.
///
/// # Errors
///
/// Returns error if client construction fails.
pub fn build_client(timeout: Duration, user_agent: Option<&str>) -> Result<Client> {
    let user_agent = user_agent.map_or_else(
        || format!("fetchq/{}", env!("CARGO_PKG_VERSION")),
        str::to_string,
    );
    ClientBuilder::new()
        .timeout(timeout)
        .user_agent(user_agent)
        .build()
        .map_err(|e| FetchqError::Transport {
            uri: String::new(),
            message: format!("failed to build HTTP client: {e}"),
        })
}

/// Parse the `Content-Length` header.
#[must_use]
pub fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// [`Transport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Create a transport with its own client.
    ///
    /// # Errors
    ///
    /// Returns error if client construction fails.
    pub fn new(timeout: Duration, user_agent: Option<&str>) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout, user_agent)?,
            timeout,
        })
    }

    fn map_error(&self, uri: &str, err: &reqwest::Error) -> FetchqError {
        if err.is_timeout() {
            FetchqError::timeout(uri, self.timeout)
        } else {
            FetchqError::Transport {
                uri: uri.to_string(),
                message: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        let mut builder = self.client.get(&request.uri);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| self.map_error(&request.uri, &e))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let content_length = content_length(&headers);

        let transport = self.clone();
        let uri = request.uri;
        let body = stream::try_unfold(response, move |mut response| {
            let transport = transport.clone();
            let uri = uri.clone();
            async move {
                match response.chunk().await {
                    Ok(Some(chunk)) => Ok(Some((chunk, response))),
                    Ok(None) => Ok(None),
                    Err(e) => Err(transport.map_error(&uri, &e)),
                }
            }
        })
        .boxed();

        Ok(TransportResponse {
            status,
            headers,
            content_length,
            body,
        })
    }
}
