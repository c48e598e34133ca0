//! HTTP transport used by the RPC layer.
//!
//! `HttpTransport` is the seam the RPC correlator talks to. The production
//! implementation, `ReqwestTransport`, wraps reqwest with:
//! - Base URL joining and query encoding
//! - Bearer authentication from an `AuthProvider`
//! - Per-request timeouts
//! - Retries on network failures, 429 and 5xx through `retry_async`

use crate::auth::AuthProvider;
use crate::config::{default_http_retry, NetworkConfig};
use crate::network::retry::{retry_async, RetryPolicy};
use crate::{Result, SyftError};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client, Method};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Request body.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Serialized as JSON with `content-type: application/json`.
    Json(serde_json::Value),
    /// Sent verbatim as `application/octet-stream`.
    Raw(Bytes),
}

/// A transport-agnostic HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Path relative to the server base URL.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    /// Deadline for the whole exchange; the transport default applies when unset.
    pub timeout: Option<Duration>,
    /// Whether the transport may retry this request on retryable failures.
    pub retry: bool,
}

impl HttpRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            query: Vec::new(),
            body: None,
            timeout: None,
            retry: true,
        }
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self {
            method: Method::POST,
            ..Self::get(path)
        }
    }

    /// Append a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Make exactly one attempt; the caller owns the retry loop.
    pub fn without_retry(mut self) -> Self {
        self.retry = false;
        self
    }

    /// Look up the first value of a query parameter.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A successful (2xx) HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Build a response from a JSON value.
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status, value.to_string())
    }
}

/// Executes HTTP requests against the SyftBox server.
///
/// Implementations return `Ok` only for 2xx statuses and map everything else
/// to `SyftError::Http`, `SyftError::Timeout` or `SyftError::Network`.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// reqwest-backed `HttpTransport` with retries.
pub struct ReqwestTransport {
    client: Client,
    base_url: Url,
    auth: Option<Arc<dyn AuthProvider>>,
    retry: RetryPolicy,
    default_timeout: Duration,
}

impl ReqwestTransport {
    /// Create a transport with default timeout and retry policy.
    pub fn new(base_url: Url) -> Result<Self> {
        Self::with_timeout(base_url, NetworkConfig::REQUEST_TIMEOUT)
    }

    /// Create a transport with a custom default timeout.
    pub fn with_timeout(base_url: Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| SyftError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                cause: None,
            })?;

        Ok(Self {
            client,
            base_url,
            auth: None,
            retry: default_http_retry(),
            default_timeout: timeout,
        })
    }

    /// Attach bearer tokens from an auth provider.
    pub fn with_auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Replace the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve the full URL for a request.
    pub fn request_url(&self, request: &HttpRequest) -> Result<Url> {
        let mut url = self.base_url.join(&request.path)?;
        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &request.query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn execute_once(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let url = self.request_url(request)?;
        let timeout = request.timeout.unwrap_or(self.default_timeout);

        let mut builder = self
            .client
            .request(request.method.clone(), url.clone())
            .timeout(timeout);

        if let Some(auth) = &self.auth {
            if auth.is_authenticated() {
                let token = auth.ensure_valid_token().await?;
                builder = builder.bearer_auth(token);
            }
        }

        builder = match &request.body {
            Some(RequestBody::Json(value)) => builder.json(value),
            Some(RequestBody::Raw(bytes)) => builder
                .header(header::CONTENT_TYPE, "application/octet-stream")
                .body(bytes.clone()),
            None => builder,
        };

        debug!("{} {}", request.method, url);

        let response = builder.send().await.map_err(|e| classify(e, timeout))?;
        let status = response.status();
        let body = response.bytes().await.map_err(|e| classify(e, timeout))?;

        if status.is_success() {
            return Ok(HttpResponse {
                status: status.as_u16(),
                body,
            });
        }

        Err(SyftError::Http {
            status: status.as_u16(),
            message: error_message(status, &body),
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        if !request.retry {
            return self.execute_once(&request).await;
        }

        let (result, stats) = retry_async(
            &self.retry,
            || self.execute_once(&request),
            SyftError::is_retryable,
        )
        .await;

        if stats.attempts > 1 {
            debug!(
                "{} {} finished after {} attempts",
                request.method, request.path, stats.attempts
            );
        }
        result
    }
}

fn classify(err: reqwest::Error, timeout: Duration) -> SyftError {
    if err.is_timeout() {
        SyftError::Timeout(timeout)
    } else {
        SyftError::from(err)
    }
}

/// Pull a human readable message out of an error body.
fn error_message(status: reqwest::StatusCode, body: &[u8]) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_slice(body).ok();
    let from_json = parsed.as_ref().and_then(|v| {
        v.get("error")
            .or_else(|| v.get("message"))
            .or_else(|| v.get("detail"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
    });

    from_json.unwrap_or_else(|| {
        let text = String::from_utf8_lossy(body);
        if text.trim().is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        } else {
            text.into_owned()
        }
    })
}
