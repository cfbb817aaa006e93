//! Plain HTTP transfer contract used for token refresh and attachment
//! fetching, with a reqwest-backed production implementation.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, StatusCode};

use crate::error::DirectLineResult;

/// A single HTTP exchange.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl HttpRequest {
    /// Create a request.
    pub fn new(method: Method, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            timeout,
        }
    }

    /// Create a GET request.
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self::new(Method::GET, url, timeout)
    }

    /// Create a POST request.
    pub fn post(url: impl Into<String>, timeout: Duration) -> Self {
        Self::new(Method::POST, url, timeout)
    }

    /// Append a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Append a bearer token header.
    #[must_use]
    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {token}"))
    }
}

/// Response to an [`HttpRequest`].
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Minimal HTTP client contract.
///
/// The refresher and the attachment fetcher talk to this trait so tests can
/// script responses without a network.
#[async_trait]
pub trait HttpTransfer: Send + Sync + 'static {
    async fn execute(&self, request: HttpRequest) -> DirectLineResult<HttpResponse>;
}

/// Production [`HttpTransfer`] backed by [`reqwest`].
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransfer {
    client: reqwest::Client,
}

impl ReqwestTransfer {
    /// Create a transfer with a fresh client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransfer for ReqwestTransfer {
    async fn execute(&self, request: HttpRequest) -> DirectLineResult<HttpResponse> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .timeout(request.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_collects_headers() {
        let request = HttpRequest::post("https://example.com/tokens/refresh", Duration::from_secs(20))
            .bearer("t0k")
            .header("x-ms-bot-agent", "DirectLine/3.0 (directlineStreaming)");

        assert_eq!(request.method, Method::POST);
        assert_eq!(request.headers.len(), 2);
        assert_eq!(request.headers[0].1, "Bearer t0k");
    }
}
