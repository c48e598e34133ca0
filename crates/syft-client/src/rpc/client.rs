//! RPC correlator.
//!
//! Sends a message over HTTP and resolves its answer, either straight from
//! the send response or from a bounded series of long-polls. Concurrent
//! polls for one request id share a single HTTP call.

use super::pending::PendingPolls;
use super::types::{
    parse_poll_response, parse_send_response, PollRequest, PollResult, SendAndWaitOptions,
    SendRequest, SendResult,
};
use crate::config::{NetworkConfig, RpcConfig};
use crate::hooks::HookChain;
use crate::network::{retry_async, HttpRequest, HttpTransport, RequestBody, RetryPolicy};
use crate::{Result, SyftError};
use futures::FutureExt;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Correlates RPC sends with their eventual responses.
///
/// Cloning is cheap; clones share pending polls and hooks.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

struct Inner {
    http: Arc<dyn HttpTransport>,
    config: RpcConfig,
    pending: PendingPolls,
    send_hooks: HookChain<SendRequest>,
}

impl RpcClient {
    pub fn new(http: Arc<dyn HttpTransport>) -> Self {
        Self::with_config(http, RpcConfig::default())
    }

    pub fn with_config(http: Arc<dyn HttpTransport>, config: RpcConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                config,
                pending: PendingPolls::new(),
                send_hooks: HookChain::new(),
            }),
        }
    }

    /// Register a hook that may rewrite every outgoing send request.
    pub fn add_send_hook<F>(&self, name: impl Into<String>, hook: F)
    where
        F: Fn(&mut SendRequest) -> Result<()> + Send + Sync + 'static,
    {
        self.inner.send_hooks.register(name, hook);
    }

    pub fn remove_send_hook(&self, name: &str) -> usize {
        self.inner.send_hooks.unregister(name)
    }

    /// Send one message.
    ///
    /// Validation happens before any network call, both on the request as
    /// given and on the request as rewritten by send hooks. HTTP failures come back
    /// as `SyftError::RpcSendFailed` with the original error as the source.
    pub async fn send_message(
        &self,
        request: &SendRequest,
        body: Option<RequestBody>,
    ) -> Result<SendResult> {
        request.validate(self.inner.config.max_request_timeout_ms)?;

        let mut request = request.clone();
        if !self.inner.send_hooks.is_empty() {
            self.inner.send_hooks.run(&mut request);
            // Hooks may rewrite anything; nothing invalid reaches the wire.
            request.validate(self.inner.config.max_request_timeout_ms)?;
        }

        let mut http = HttpRequest::post(NetworkConfig::SEND_MESSAGE_PATH)
            .query("x-syft-url", request.syft_url.to_string())
            .query("x-syft-from", request.from.clone());
        if let Some(ms) = request.timeout_ms {
            http = http
                .query("timeout", ms.to_string())
                .timeout(Duration::from_millis(ms) + self.inner.config.request_grace);
        }
        http = http.query("x-syft-raw", request.raw.to_string());
        if let Some(body) = body {
            http = http.body(body);
        }

        debug!("Sending RPC message to {}", request.syft_url);
        let response = self
            .inner
            .http
            .execute(http)
            .await
            .map_err(|e| SyftError::RpcSendFailed {
                message: e.to_string(),
                source: Some(Box::new(e)),
            })?;

        let result = parse_send_response(&response).map_err(|e| SyftError::RpcSendFailed {
            message: e.to_string(),
            source: Some(Box::new(e)),
        })?;
        debug!(
            "RPC send to {} returned {} (request {})",
            request.syft_url, result.status, result.request_id
        );
        Ok(result)
    }

    /// Poll once for the answer to `request`.
    ///
    /// Joins the in-flight poll for the same request id if there is one.
    pub async fn poll_for_response(&self, request: &PollRequest) -> Result<PollResult> {
        request.validate(self.inner.config.max_request_timeout_ms)?;

        let inner = self.inner.clone();
        let poll = request.clone();
        let (future, created) = self
            .inner
            .pending
            .join_or_start(&request.request_id, move |token, generation| {
                inner.run_poll(poll, token, generation).boxed()
            });

        if created {
            // Drive the poll to completion even if every caller goes away,
            // so its entry is always settled.
            tokio::spawn(future.clone());
        } else {
            debug!("Joining in-flight poll for {}", request.request_id);
        }
        future.await
    }

    /// Send, then poll until the answer arrives, attempts run out, or
    /// `options.timeout` elapses.
    pub async fn send_and_wait(
        &self,
        request: &SendRequest,
        body: Option<RequestBody>,
        options: &SendAndWaitOptions,
    ) -> Result<Value> {
        let in_flight: Mutex<Option<String>> = Mutex::new(None);

        let work = async {
            let sent = self.send_message(request, body).await?;
            if let Some(response) = sent.response {
                return Ok(response);
            }

            if let Ok(mut slot) = in_flight.lock() {
                *slot = Some(sent.request_id.clone());
            }
            self.wait_for_response(request, &sent.request_id, options)
                .await
        };

        match tokio::time::timeout(options.timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                let request_id = in_flight.lock().ok().and_then(|mut slot| slot.take());
                if let Some(id) = &request_id {
                    self.cancel_poll(id);
                }
                warn!("send_and_wait timed out after {:?}", options.timeout);
                Err(SyftError::SendAndWaitTimeout {
                    timeout: options.timeout,
                    request_id,
                })
            }
        }
    }

    async fn wait_for_response(
        &self,
        request: &SendRequest,
        request_id: &str,
        options: &SendAndWaitOptions,
    ) -> Result<Value> {
        if options.max_poll_attempts == 0 {
            return Err(SyftError::MaxPollAttemptsExceeded {
                request_id: request_id.to_string(),
                attempts: 0,
            });
        }

        let poll = PollRequest::new(request_id, request.from.clone(), request.syft_url.clone())
            .with_timeout_ms(request.timeout_ms);
        let policy = RetryPolicy::linear(options.max_poll_attempts, options.poll_interval);

        let (result, stats) = retry_async(
            &policy,
            || self.poll_for_response(&poll),
            SyftError::is_poll_timeout,
        )
        .await;

        match result {
            Ok(polled) => {
                info!(
                    "Request {} answered after {} poll(s)",
                    request_id, stats.attempts
                );
                Ok(polled.response.unwrap_or(Value::Null))
            }
            Err(e) if e.is_poll_timeout() && stats.exhausted => {
                Err(SyftError::MaxPollAttemptsExceeded {
                    request_id: request_id.to_string(),
                    attempts: stats.attempts,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Cancel the poll for `request_id`. Waiters get `PollCancelled`.
    pub fn cancel_poll(&self, request_id: &str) -> bool {
        let cancelled = self.inner.pending.cancel(request_id);
        if cancelled {
            info!("Cancelled poll for {}", request_id);
        }
        cancelled
    }

    /// Request ids with a poll in flight, sorted.
    pub fn pending_requests(&self) -> Vec<String> {
        self.inner.pending.request_ids()
    }

    /// Cancel every pending poll. Returns how many were cancelled.
    pub fn cleanup(&self) -> usize {
        let count = self.inner.pending.cancel_all();
        if count > 0 {
            info!("Cancelled {} pending poll(s)", count);
        }
        count
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("pending", &self.inner.pending.len())
            .field("send_hooks", &self.inner.send_hooks.len())
            .finish()
    }
}

impl Inner {
    async fn run_poll(
        self: Arc<Self>,
        request: PollRequest,
        token: CancellationToken,
        generation: u64,
    ) -> Result<PollResult> {
        let request_id = request.request_id.clone();
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Err(SyftError::PollCancelled {
                request_id: request_id.clone(),
            }),
            result = self.poll_once(&request) => result,
        };
        self.pending.settle(&request_id, generation);
        outcome
    }

    async fn poll_once(&self, request: &PollRequest) -> Result<PollResult> {
        let timeout = request
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.default_poll_timeout);

        let http = HttpRequest::get(NetworkConfig::POLL_PATH)
            .query("x-syft-request-id", request.request_id.clone())
            .query("x-syft-from", request.from.clone())
            .query("x-syft-url", request.syft_url.to_string())
            .query("timeout", timeout.as_millis().to_string())
            .timeout(timeout + self.config.request_grace)
            .without_retry();

        let id = &request.request_id;
        match self.http.execute(http).await {
            // Accepted but not answered within the long-poll window.
            Ok(response) if response.status == 202 => Err(SyftError::PollTimeout {
                request_id: id.clone(),
            }),
            Ok(response) => parse_poll_response(id, &response).map_err(|e| SyftError::PollFailed {
                request_id: id.clone(),
                message: e.to_string(),
                source: Some(Box::new(e)),
            }),
            Err(e) => Err(classify_poll_error(id, e)),
        }
    }
}

fn classify_poll_error(request_id: &str, err: SyftError) -> SyftError {
    match err {
        SyftError::Http { status: 404, .. } => SyftError::PollNotFound {
            request_id: request_id.to_string(),
        },
        SyftError::Http {
            status: 408 | 504, ..
        }
        | SyftError::Timeout(_) => SyftError::PollTimeout {
            request_id: request_id.to_string(),
        },
        other => SyftError::PollFailed {
            request_id: request_id.to_string(),
            message: other.to_string(),
            source: Some(Box::new(other)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_poll_error_classification() {
        let not_found = classify_poll_error(
            "r1",
            SyftError::Http {
                status: 404,
                message: "gone".into(),
            },
        );
        assert!(matches!(not_found, SyftError::PollNotFound { .. }));

        let gateway = classify_poll_error(
            "r1",
            SyftError::Http {
                status: 504,
                message: String::new(),
            },
        );
        assert!(gateway.is_poll_timeout());

        let timeout = classify_poll_error("r1", SyftError::Timeout(Duration::from_secs(35)));
        assert!(timeout.is_poll_timeout());

        let server = classify_poll_error(
            "r1",
            SyftError::Http {
                status: 500,
                message: "boom".into(),
            },
        );
        assert_eq!(server.kind(), ErrorKind::Poll);
        assert!(std::error::Error::source(&server).is_some());
    }
}
