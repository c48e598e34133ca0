//! Request/poll RPC over HTTP.

mod client;
mod pending;
mod types;

pub use crate::network::RequestBody;
pub use client::RpcClient;
pub use types::{PollRequest, PollResult, SendAndWaitOptions, SendRequest, SendResult};
