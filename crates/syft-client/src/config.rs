//! Centralized configuration for the SyftBox client.
//!
//! Constant tables hold protocol paths and defaults; `TransportConfig` and
//! `RpcConfig` are the runtime settings handed to each component.

use crate::error::{Result, SyftError};
use crate::network::RetryPolicy;
use std::time::Duration;
use url::Url;

/// Network-related constants.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const USER_AGENT: &'static str = "SyftBox-Client/1.0";
    pub const EVENTS_PATH: &'static str = "/api/v1/events";
    pub const SEND_MESSAGE_PATH: &'static str = "/api/v1/send/msg";
    pub const POLL_PATH: &'static str = "/api/v1/send/poll";
    pub const TOKEN_QUERY_PARAM: &'static str = "token";
    pub const HTTP_RETRY_ATTEMPTS: u32 = 3;
    pub const HTTP_RETRY_INITIAL_DELAY: Duration = Duration::from_millis(500);
    pub const HTTP_RETRY_MAX_DELAY: Duration = Duration::from_secs(10);
}

/// Real-time transport defaults.
pub struct TransportDefaults;

impl TransportDefaults {
    pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
    pub const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);
    pub const RECONNECT_BACKOFF_FACTOR: f64 = 2.0;
    pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
    pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const MAX_QUEUE_SIZE: usize = 1000;
    /// Close code for a negotiated, normal closure.
    pub const NORMAL_CLOSURE: u16 = 1000;
    /// Close code used when the socket went away without a close frame.
    pub const ABNORMAL_CLOSURE: u16 = 1006;
}

/// RPC defaults.
pub struct RpcDefaults;

impl RpcDefaults {
    pub const MAX_REQUEST_TIMEOUT_MS: u64 = 300_000;
    pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(30);
    /// Extra time granted to the HTTP call beyond the server-side long-poll timeout.
    pub const REQUEST_GRACE: Duration = Duration::from_secs(5);
    pub const MAX_POLL_ATTEMPTS: u32 = 20;
    pub const POLL_INTERVAL: Duration = Duration::from_secs(1);
    pub const SEND_AND_WAIT_TIMEOUT: Duration = Duration::from_secs(120);
}

/// Runtime settings for the real-time connection manager.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Base server URL (`http://` or `https://`).
    pub server_url: Url,
    /// Path of the events endpoint.
    pub events_path: String,
    /// Query parameter carrying the bearer token.
    pub token_query_param: String,
    /// Reconnections allowed after an abnormal closure before giving up.
    pub max_reconnect_attempts: u32,
    pub initial_reconnect_delay: Duration,
    pub reconnect_backoff_factor: f64,
    pub max_reconnect_delay: Duration,
    pub heartbeat_interval: Duration,
    /// Deadline for a single socket open.
    pub connect_timeout: Duration,
    /// Capacity of the outbound queue; the oldest entry is evicted on overflow.
    pub max_queue_size: usize,
}

impl TransportConfig {
    /// Create a config for the given server with default tuning.
    pub fn new(server_url: Url) -> Self {
        Self {
            server_url,
            events_path: NetworkConfig::EVENTS_PATH.to_string(),
            token_query_param: NetworkConfig::TOKEN_QUERY_PARAM.to_string(),
            max_reconnect_attempts: TransportDefaults::MAX_RECONNECT_ATTEMPTS,
            initial_reconnect_delay: TransportDefaults::INITIAL_RECONNECT_DELAY,
            reconnect_backoff_factor: TransportDefaults::RECONNECT_BACKOFF_FACTOR,
            max_reconnect_delay: TransportDefaults::MAX_RECONNECT_DELAY,
            heartbeat_interval: TransportDefaults::HEARTBEAT_INTERVAL,
            connect_timeout: TransportDefaults::CONNECT_TIMEOUT,
            max_queue_size: TransportDefaults::MAX_QUEUE_SIZE,
        }
    }

    /// Set the maximum number of reconnection attempts.
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the initial reconnect delay.
    pub fn with_initial_reconnect_delay(mut self, delay: Duration) -> Self {
        self.initial_reconnect_delay = delay;
        self
    }

    /// Set the reconnect backoff multiplier.
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.reconnect_backoff_factor = factor;
        self
    }

    /// Set the reconnect delay cap.
    pub fn with_max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.max_reconnect_delay = delay;
        self
    }

    /// Set the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the socket open deadline.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the outbound queue capacity.
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Backoff schedule for reconnect timers.
    pub fn reconnect_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(self.max_reconnect_attempts)
            .with_initial_delay(self.initial_reconnect_delay)
            .with_backoff_factor(self.reconnect_backoff_factor)
            .with_max_delay(self.max_reconnect_delay)
    }

    /// Build the websocket URL for the events endpoint.
    ///
    /// `http` becomes `ws`, `https` becomes `wss`, and the token travels as a
    /// query parameter.
    pub fn events_url(&self, token: &str) -> Result<Url> {
        let scheme = match self.server_url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(SyftError::Config {
                    message: format!("unsupported server URL scheme '{}'", other),
                })
            }
        };

        let mut url = self.server_url.join(&self.events_path)?;
        url.set_scheme(scheme).map_err(|_| SyftError::Config {
            message: format!("cannot switch {} to {}", self.server_url, scheme),
        })?;
        url.query_pairs_mut()
            .clear()
            .append_pair(&self.token_query_param, token);
        Ok(url)
    }
}

/// Runtime settings for the RPC correlator.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Server-side long-poll timeout used when a poll does not carry its own.
    pub default_poll_timeout: Duration,
    /// Upper bound for caller supplied timeouts, in milliseconds.
    pub max_request_timeout_ms: u64,
    /// Added to the server-side timeout to get the HTTP call deadline.
    pub request_grace: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            default_poll_timeout: RpcDefaults::DEFAULT_POLL_TIMEOUT,
            max_request_timeout_ms: RpcDefaults::MAX_REQUEST_TIMEOUT_MS,
            request_grace: RpcDefaults::REQUEST_GRACE,
        }
    }
}

impl RpcConfig {
    /// Set the default long-poll timeout.
    pub fn with_default_poll_timeout(mut self, timeout: Duration) -> Self {
        self.default_poll_timeout = timeout;
        self
    }

    /// Set the HTTP deadline grace period.
    pub fn with_request_grace(mut self, grace: Duration) -> Self {
        self.request_grace = grace;
        self
    }
}

/// Retry policy for the HTTP layer.
pub fn default_http_retry() -> RetryPolicy {
    RetryPolicy::new()
        .with_max_attempts(NetworkConfig::HTTP_RETRY_ATTEMPTS)
        .with_initial_delay(NetworkConfig::HTTP_RETRY_INITIAL_DELAY)
        .with_max_delay(NetworkConfig::HTTP_RETRY_MAX_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> TransportConfig {
        TransportConfig::new(Url::parse(url).unwrap())
    }

    #[test]
    fn test_events_url_rewrites_scheme() {
        let url = config("https://syftbox.net").events_url("abc").unwrap();
        assert_eq!(url.as_str(), "wss://syftbox.net/api/v1/events?token=abc");

        let url = config("http://localhost:8080").events_url("t").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8080/api/v1/events?token=t");
    }

    #[test]
    fn test_events_url_encodes_token() {
        let url = config("http://localhost").events_url("a b&c").unwrap();
        assert_eq!(url.query(), Some("token=a+b%26c"));
    }

    #[test]
    fn test_events_url_rejects_other_schemes() {
        let err = config("ftp://example.com").events_url("t").unwrap_err();
        assert!(matches!(err, SyftError::Config { .. }));
    }

    #[test]
    fn test_timeouts_are_reasonable() {
        assert!(RpcDefaults::MAX_REQUEST_TIMEOUT_MS == 300_000);
        assert!(TransportDefaults::MAX_RECONNECT_DELAY > TransportDefaults::INITIAL_RECONNECT_DELAY);
        assert!(NetworkConfig::REQUEST_TIMEOUT > Duration::ZERO);
    }
}
