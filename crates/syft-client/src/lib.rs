//! SyftBox client - resilient real-time and RPC transport.
//!
//! Two channels talk to a SyftBox server:
//!
//! - [`ConnectionManager`] keeps a websocket to the events endpoint alive,
//!   queues outbound messages while offline and reconnects with bounded
//!   exponential backoff. Failures are reported as [`TransportEvent`]s.
//! - [`RpcClient`] sends a message over HTTP and resolves its answer, either
//!   immediately or by long-polling, with per-request poll deduplication and
//!   cancellation.
//!
//! Both share the retry primitive in [`network`].
//!
//! # Example
//!
//! ```rust,ignore
//! use syft_client::{SendAndWaitOptions, SendRequest, SyftClient, SyftUrl};
//!
//! #[tokio::main]
//! async fn main() -> syft_client::Result<()> {
//!     let client = SyftClient::builder("https://syftbox.net".parse()?)
//!         .with_token("secret")
//!         .build()?;
//!
//!     let url = SyftUrl::parse("syft://alice@openmined.org/app/rpc")?;
//!     let request = SendRequest::new(url, "bob@openmined.org");
//!     let answer = client
//!         .rpc()
//!         .send_and_wait(&request, None, &SendAndWaitOptions::default())
//!         .await?;
//!     println!("{}", answer);
//!
//!     client.shutdown();
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod hooks;
pub mod message;
pub mod network;
pub mod rpc;
pub mod transport;

// Re-export commonly used types
pub use address::SyftUrl;
pub use auth::{AuthProvider, StaticTokenAuth};
pub use client::{SyftClient, SyftClientBuilder};
pub use config::{RpcConfig, TransportConfig};
pub use error::{ErrorKind, Result, SyftError};
pub use message::{Message, MessageType};
pub use network::{retry_async, RetryPolicy};
pub use rpc::{
    PollRequest, PollResult, RequestBody, RpcClient, SendAndWaitOptions, SendRequest, SendResult,
};
pub use transport::{ConnectionManager, ConnectionState, ListenerId, TransportEvent};
