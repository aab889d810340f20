use std::fmt;
use std::time::Duration;

use reqwest::Method;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;

use crate::error::{Error, Result};

/// One outbound HTTP exchange, already carrying its query parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    /// Sent as `application/json` when present.
    pub body: Option<Value>,
}

impl RawRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Status and body text of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Sends requests on behalf of [`crate::Client`].
///
/// Implementations report every HTTP status as a [`RawResponse`]; only failures
/// below HTTP (connect, TLS, timeouts) are errors. A read timeout must surface as
/// [`Error::Timeout`].
pub trait Transport: fmt::Debug + Send + Sync {
    fn send(&self, request: &RawRequest) -> Result<RawResponse>;
}

/// Blocking reqwest transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: HttpClient,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("portall-rs/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or(HeaderValue::from_static("portall-rs")),
        );

        let http = HttpClient::builder()
            .default_headers(default_headers)
            .timeout(timeout)
            .build()
            .map_err(transport_error)?;

        Ok(Self { http })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &RawRequest) -> Result<RawResponse> {
        let mut req = self
            .http
            .request(request.method.clone(), &request.url)
            .query(&request.query);
        if let Some(body) = &request.body {
            req = req
                .header(CONTENT_TYPE, "application/json")
                .body(serde_json::to_vec(body)?);
        }

        let resp = req.send().map_err(transport_error)?;
        let status = resp.status().as_u16();
        let body = resp.text().map_err(transport_error)?;

        Ok(RawResponse { status, body })
    }
}

// Only a response that is slow to arrive gets the batch hint; failing to connect,
// timed out or not, stays an HTTP error.
fn transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() && !err.is_connect() {
        Error::Timeout
    } else {
        Error::Http(err)
    }
}
