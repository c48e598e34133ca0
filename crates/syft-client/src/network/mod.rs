//! Network utilities for HTTP operations and retries.
//!
//! This module provides:
//! - Bounded backoff retry shared by the HTTP layer, poll loop and reconnects
//! - The `HttpTransport` seam and its reqwest implementation

mod http;
mod retry;

pub use http::{HttpRequest, HttpResponse, HttpTransport, RequestBody, ReqwestTransport};
pub use retry::{retry_async, Backoff, RetryPolicy, RetryStats};
