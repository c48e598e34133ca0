//! Transport events and listener registration.
//!
//! The connection manager never throws network failures at callers. It emits
//! them here, together with lifecycle changes and inbound messages.

use crate::message::Message;
use crate::SyftError;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::error;

/// Something observable happened on the real-time connection.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Socket opened.
    Connected,
    /// Socket opened after `attempts` reconnections. Follows `Connected`.
    Reconnected { attempts: u32 },
    /// Socket closed.
    Disconnected { code: u16, reason: String },
    /// A reconnect is scheduled after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// Reconnect budget exhausted. Emitted once per failure cycle.
    ReconnectFailed { attempts: u32 },
    /// Decoded inbound message.
    Message(Message),
    /// Non-fatal or fatal error; the state tells which.
    Error(SyftError),
}

impl TransportEvent {
    /// Short event name.
    pub fn name(&self) -> &'static str {
        match self {
            TransportEvent::Connected => "connected",
            TransportEvent::Reconnected { .. } => "reconnected",
            TransportEvent::Disconnected { .. } => "disconnected",
            TransportEvent::Reconnecting { .. } => "reconnecting",
            TransportEvent::ReconnectFailed { .. } => "reconnect_failed",
            TransportEvent::Message(_) => "message",
            TransportEvent::Error(_) => "error",
        }
    }
}

/// Handle returned by listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&TransportEvent) + Send + Sync>;

/// Ordered set of event listeners.
#[derive(Default)]
pub struct EventListeners {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
}

impl EventListeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Listeners run in registration order.
    pub fn add<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push((id, Arc::new(listener)));
        }
        id
    }

    /// Register a listener that forwards every event into a channel.
    pub fn channel(&self) -> (ListenerId, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.add(move |event| {
            let _ = tx.send(event.clone());
        });
        (id, rx)
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        match self.listeners.write() {
            Ok(mut listeners) => {
                let before = listeners.len();
                listeners.retain(|(existing, _)| *existing != id);
                listeners.len() != before
            }
            Err(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.read().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every listener. A panicking listener is logged and skipped.
    pub fn emit(&self, event: &TransportEvent) {
        let snapshot: Vec<Listener> = match self.listeners.read() {
            Ok(listeners) => listeners.iter().map(|(_, l)| l.clone()).collect(),
            Err(_) => return,
        };

        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!("Transport listener panicked on '{}' event", event.name());
            }
        }
    }
}
