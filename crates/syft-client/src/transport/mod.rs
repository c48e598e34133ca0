//! Real-time transport.
//!
//! `ConnectionManager` keeps a single websocket to the events endpoint alive:
//! it queues outbound messages while offline, reconnects with exponential
//! backoff after abnormal closures and sends periodic heartbeats.

mod events;
mod manager;
mod socket;
mod state;

pub use events::{EventListeners, ListenerId, TransportEvent};
pub use manager::ConnectionManager;
pub use socket::{
    socket_pair, InboundFrame, OutboundFrame, RemoteSocket, SocketConnector, SocketHandle,
    TungsteniteConnector,
};
pub use state::ConnectionState;
