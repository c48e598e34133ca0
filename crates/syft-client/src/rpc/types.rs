//! Request and result types for the RPC correlator.

use crate::address::SyftUrl;
use crate::config::RpcDefaults;
use crate::network::HttpResponse;
use crate::{Result, SyftError};
use serde_json::Value;
use std::time::Duration;

/// An outgoing RPC message.
#[derive(Debug, Clone, PartialEq)]
pub struct SendRequest {
    /// Destination address.
    pub syft_url: SyftUrl,
    /// Sender identity, usually an email.
    pub from: String,
    /// Server-side wait for a synchronous answer, in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Ask the server to forward the body untouched.
    pub raw: bool,
}

impl SendRequest {
    pub fn new(syft_url: SyftUrl, from: impl Into<String>) -> Self {
        Self {
            syft_url,
            from: from.into(),
            timeout_ms: None,
            raw: false,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    pub(crate) fn validate(&self, max_timeout_ms: u64) -> Result<()> {
        validate_from(&self.from)?;
        self.syft_url.validate()?;
        validate_timeout(self.timeout_ms, max_timeout_ms)
    }
}

/// A request to collect the answer for an earlier send.
#[derive(Debug, Clone, PartialEq)]
pub struct PollRequest {
    pub request_id: String,
    pub from: String,
    pub syft_url: SyftUrl,
    /// Server-side long-poll timeout, in milliseconds.
    pub timeout_ms: Option<u64>,
}

impl PollRequest {
    pub fn new(request_id: impl Into<String>, from: impl Into<String>, syft_url: SyftUrl) -> Self {
        Self {
            request_id: request_id.into(),
            from: from.into(),
            syft_url,
            timeout_ms: None,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: Option<u64>) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub(crate) fn validate(&self, max_timeout_ms: u64) -> Result<()> {
        if self.request_id.trim().is_empty() {
            return Err(SyftError::invalid("request_id", "must not be empty"));
        }
        validate_from(&self.from)?;
        self.syft_url.validate()?;
        validate_timeout(self.timeout_ms, max_timeout_ms)
    }
}

fn validate_from(from: &str) -> Result<()> {
    if from.trim().is_empty() {
        return Err(SyftError::invalid("from", "must not be empty"));
    }
    Ok(())
}

fn validate_timeout(timeout_ms: Option<u64>, max_timeout_ms: u64) -> Result<()> {
    match timeout_ms {
        Some(ms) if ms > max_timeout_ms => Err(SyftError::invalid(
            "timeout",
            format!("{} ms is outside [0, {}]", ms, max_timeout_ms),
        )),
        _ => Ok(()),
    }
}

/// Outcome of a send.
#[derive(Debug, Clone, PartialEq)]
pub struct SendResult {
    pub status: u16,
    pub request_id: String,
    /// Present when the server answered synchronously.
    pub response: Option<Value>,
    /// Where to poll when it did not.
    pub poll_url: Option<String>,
}

/// Outcome of a successful poll.
#[derive(Debug, Clone, PartialEq)]
pub struct PollResult {
    pub status: u16,
    pub request_id: String,
    pub response: Option<Value>,
}

/// Tuning for `RpcClient::send_and_wait`.
#[derive(Debug, Clone, PartialEq)]
pub struct SendAndWaitOptions {
    pub max_poll_attempts: u32,
    /// Base of the linear wait between polls that timed out.
    pub poll_interval: Duration,
    /// Deadline for the whole exchange.
    pub timeout: Duration,
}

impl Default for SendAndWaitOptions {
    fn default() -> Self {
        Self {
            max_poll_attempts: RpcDefaults::MAX_POLL_ATTEMPTS,
            poll_interval: RpcDefaults::POLL_INTERVAL,
            timeout: RpcDefaults::SEND_AND_WAIT_TIMEOUT,
        }
    }
}

impl SendAndWaitOptions {
    pub fn with_max_poll_attempts(mut self, attempts: u32) -> Self {
        self.max_poll_attempts = attempts;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// Response envelope: {"request_id": "...", "data": {"message": ...} | {"poll_url": "..."}}
// with camelCase spellings accepted as well.

fn field<'a>(value: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .find_map(|name| value.get(*name).filter(|v| !v.is_null()))
}

fn parse_body(response: &HttpResponse) -> Result<Value> {
    if response.body.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&response.body).map_err(|e| SyftError::Json {
        message: format!("invalid RPC response body: {}", e),
    })
}

/// Request id embedded in a poll URL, if any.
fn request_id_from_poll_url(poll_url: &str) -> Option<String> {
    let query = poll_url.split_once('?')?.1;
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key != "x-syft-request-id" {
            return None;
        }
        urlencoding::decode(value).ok().map(|v| v.into_owned())
    })
}

pub(crate) fn parse_send_response(response: &HttpResponse) -> Result<SendResult> {
    let body = parse_body(response)?;
    let data = field(&body, &["data"]).unwrap_or(&body);

    let poll_url = field(data, &["poll_url", "pollURL", "pollUrl"])
        .and_then(Value::as_str)
        .map(str::to_string);
    let request_id = field(&body, &["request_id", "requestId"])
        .or_else(|| field(data, &["request_id", "requestId"]))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| poll_url.as_deref().and_then(request_id_from_poll_url));
    let response_value = if response.status == 200 {
        field(data, &["message", "response"]).cloned()
    } else {
        None
    };

    let request_id = match (request_id, &response_value) {
        (Some(id), _) => id,
        (None, Some(_)) => String::new(),
        (None, None) => {
            return Err(SyftError::Json {
                message: "send response carries neither a response nor a request id".to_string(),
            })
        }
    };

    Ok(SendResult {
        status: response.status,
        request_id,
        response: response_value,
        poll_url,
    })
}

pub(crate) fn parse_poll_response(request_id: &str, response: &HttpResponse) -> Result<PollResult> {
    let body = parse_body(response)?;
    let data = field(&body, &["data"]).unwrap_or(&body);
    let response_value = field(data, &["message", "response"])
        .or(if data.is_null() { None } else { Some(data) })
        .cloned();

    Ok(PollResult {
        status: response.status,
        request_id: field(&body, &["request_id", "requestId"])
            .and_then(Value::as_str)
            .unwrap_or(request_id)
            .to_string(),
        response: response_value,
    })
}
