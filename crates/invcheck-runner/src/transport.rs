//! The network seam
//!
//! Everything the engine sends goes through [`Transport`]. Production code uses
//! [`ReqwestTransport`]; tests plug in an in-memory service.

use std::collections::BTreeMap;
use std::time::Duration;

use invcheck_core::HttpMethod;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

/// A fully resolved request, ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
}

/// Raw response as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Sends one request. Implementations must not retry.
pub trait Transport: Send + Sync {
    /// # Errors
    ///
    /// Returns [`TransportError`] when no complete response was received.
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("unreadable response body: {0}")]
    Body(String),
    #[error("request failed: {0}")]
    Other(String),
}

/// Blocking `reqwest` client with a per-request timeout.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, crate::RunError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| crate::RunError::Http(e.to_string()))?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| TransportError::Other(e.to_string()))?;

        let mut req = self
            .client
            .request(method, &request.url)
            .headers(header_map(&request.headers)?);
        if let Some(body) = &request.body {
            req = req.json(body);
        }

        let resp = req.send().map_err(classify)?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .map_err(|e| TransportError::Body(e.to_string()))?;
        Ok(HttpResponse { status, body })
    }
}

/// Every header must be valid HTTP; none are dropped.
fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let key = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::Other(format!("invalid header name '{name}': {e}")))?;
        let val = HeaderValue::from_str(value)
            .map_err(|e| TransportError::Other(format!("invalid value for header '{name}': {e}")))?;
        map.insert(key, val);
    }
    Ok(map)
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}
