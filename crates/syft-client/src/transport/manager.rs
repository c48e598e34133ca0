//! Real-time connection manager.
//!
//! Owns at most one socket. Every connect attempt gets a fresh epoch number;
//! timers, readers and heartbeats carry the epoch they were started for and
//! become no-ops once the manager has moved on. State lives behind a plain
//! mutex that is never held across an await, and events are emitted only
//! after the lock is released so listeners may call back into the manager.

use super::events::{EventListeners, ListenerId, TransportEvent};
use super::socket::{InboundFrame, OutboundFrame, SocketConnector, SocketHandle};
use super::state::ConnectionState;
use crate::auth::AuthProvider;
use crate::config::{TransportConfig, TransportDefaults};
use crate::message::Message;
use crate::network::RetryPolicy;
use crate::{Result, SyftError};
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Keeps one real-time connection alive and routes messages over it.
///
/// Cloning is cheap; clones share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: TransportConfig,
    reconnect_policy: RetryPolicy,
    auth: Arc<dyn AuthProvider>,
    connector: Arc<dyn SocketConnector>,
    conn: Mutex<Connection>,
    listeners: EventListeners,
}

struct Connection {
    state: ConnectionState,
    epoch: u64,
    reconnect_attempts: u32,
    queue: VecDeque<Message>,
    socket: Option<mpsc::UnboundedSender<OutboundFrame>>,
    reconnect_timer: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl Connection {
    fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            epoch: 0,
            reconnect_attempts: 0,
            queue: VecDeque::new(),
            socket: None,
            reconnect_timer: None,
            heartbeat: None,
            reader: None,
        }
    }

    /// Abort every background task and drop the socket sender.
    fn stop_tasks(&mut self) {
        for task in [
            self.reconnect_timer.take(),
            self.heartbeat.take(),
            self.reader.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
    }

    /// Move into `Connecting` under a new epoch, unless already connecting or connected.
    fn begin_connect(&mut self) -> Option<u64> {
        if self.state.is_active() {
            return None;
        }
        if self.state == ConnectionState::Failed {
            self.reconnect_attempts = 0;
        }
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        self.state = ConnectionState::Connecting;
        self.epoch += 1;
        Some(self.epoch)
    }
}

impl ConnectionManager {
    pub fn new(
        config: TransportConfig,
        auth: Arc<dyn AuthProvider>,
        connector: Arc<dyn SocketConnector>,
    ) -> Self {
        let reconnect_policy = config.reconnect_policy();
        Self {
            inner: Arc::new(Inner {
                config,
                reconnect_policy,
                auth,
                connector,
                conn: Mutex::new(Connection::new()),
                listeners: EventListeners::new(),
            }),
        }
    }

    /// Open the connection.
    ///
    /// No-op while already connecting or connected. From `Reconnecting` the
    /// pending timer is cancelled and the attempt starts right away; from
    /// `Failed` the reconnect budget is reset. Fails fast when the auth
    /// provider has no usable token.
    ///
    /// The attempt runs as its own task and always settles the state, even
    /// if the returned future is dropped before it completes.
    pub async fn connect(&self) -> Result<()> {
        let epoch = {
            let mut conn = self.inner.lock();
            match conn.begin_connect() {
                Some(epoch) => epoch,
                None => {
                    debug!("connect() ignored, connection is {}", conn.state);
                    return Ok(());
                }
            }
        };
        match tokio::spawn(self.inner.clone().open_boxed(epoch)).await {
            Ok(result) => result,
            Err(e) => Err(SyftError::ConnectionFailed {
                message: format!("connect task ended early: {}", e),
            }),
        }
    }

    /// Close the connection with a normal closure and forget queued messages.
    ///
    /// No reconnect follows. Calling this while already disconnected is harmless.
    pub fn disconnect(&self) {
        let mut events = Vec::new();
        {
            let mut conn = self.inner.lock();
            conn.epoch += 1;
            conn.stop_tasks();
            if let Some(socket) = conn.socket.take() {
                let _ = socket.send(OutboundFrame::Close {
                    code: TransportDefaults::NORMAL_CLOSURE,
                    reason: "client disconnect".to_string(),
                });
            }
            conn.queue.clear();
            conn.reconnect_attempts = 0;
            let previous = std::mem::replace(&mut conn.state, ConnectionState::Disconnected);
            if previous != ConnectionState::Disconnected {
                info!("Disconnected from {}", self.inner.config.server_url);
                events.push(TransportEvent::Disconnected {
                    code: TransportDefaults::NORMAL_CLOSURE,
                    reason: "client disconnect".to_string(),
                });
            }
        }
        self.inner.emit_all(events);
    }

    /// Send a message, or queue it until the connection is open.
    ///
    /// Never fails: write errors surface as `Error` events. Queuing while
    /// fully disconnected also starts a connect attempt; outside a Tokio
    /// runtime the message stays queued and an `Error` event is emitted.
    pub fn send(&self, message: Message) {
        let mut events = Vec::new();
        let mut start = None;
        {
            let mut conn = self.inner.lock();
            let live = match conn.state {
                ConnectionState::Connected => conn.socket.clone(),
                _ => None,
            };
            match live {
                Some(socket) => {
                    if let Err(e) = write_message(&socket, &message) {
                        events.push(TransportEvent::Error(e));
                    }
                }
                None => {
                    debug!("Queueing message {} while {}", message.id(), conn.state);
                    conn.queue.push_back(message);
                    if conn.queue.len() > self.inner.config.max_queue_size {
                        if let Some(dropped) = conn.queue.pop_front() {
                            warn!("Outbound queue full, dropped message {}", dropped.id());
                        }
                    }
                    if conn.state == ConnectionState::Disconnected {
                        start = conn.begin_connect();
                    }
                }
            }
        }

        if let Some(epoch) = start {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(self.inner.clone().open_boxed(epoch));
                }
                Err(e) => events.extend(self.inner.abandon_connect(epoch, e.to_string())),
            }
        }
        self.inner.emit_all(events);
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().state == ConnectionState::Connected
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Reconnections attempted in the current failure cycle.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.lock().reconnect_attempts
    }

    /// Messages waiting for the connection to open.
    pub fn queued_messages(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Register an event listener.
    pub fn on_event<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.add(listener)
    }

    /// Register a listener that forwards events into a channel.
    pub fn subscribe(&self) -> (ListenerId, mpsc::UnboundedReceiver<TransportEvent>) {
        self.inner.listeners.channel()
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("server_url", &self.inner.config.server_url.as_str())
            .field("state", &self.connection_state())
            .finish()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Connection> {
        // Listener panics are caught before they can poison this lock.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit_all(&self, events: Vec<TransportEvent>) {
        for event in &events {
            self.listeners.emit(event);
        }
    }

    fn open_boxed(self: Arc<Self>, epoch: u64) -> BoxFuture<'static, Result<()>> {
        Box::pin(self.open(epoch))
    }

    /// Run one connect attempt for `epoch`.
    async fn open(self: Arc<Self>, epoch: u64) -> Result<()> {
        let token = match self.authenticate().await {
            Ok(token) => token,
            Err(e) => return Err(self.auth_failed(epoch, e)),
        };
        let url = match self.config.events_url(&token) {
            Ok(url) => url,
            Err(e) => return Err(self.auth_failed(epoch, e)),
        };

        info!("Connecting to {}", self.config.server_url);
        let timeout = self.config.connect_timeout;
        let handle = match tokio::time::timeout(timeout, self.connector.open(&url)).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => return Err(self.open_failed(epoch, e)),
            Err(_) => {
                let e = SyftError::ConnectionFailed {
                    message: format!("connect timed out after {:?}", timeout),
                };
                return Err(self.open_failed(epoch, e));
            }
        };

        self.on_open(epoch, handle);
        Ok(())
    }

    async fn authenticate(&self) -> Result<String> {
        if !self.auth.is_authenticated() {
            return Err(SyftError::WebSocketAuthenticationFailed {
                message: "no authentication token available".to_string(),
            });
        }
        self.auth
            .ensure_valid_token()
            .await
            .map_err(|e| SyftError::WebSocketAuthenticationFailed {
                message: e.to_string(),
            })
    }

    /// Auth problems are terminal: go straight to `Failed`.
    fn auth_failed(&self, epoch: u64, err: SyftError) -> SyftError {
        let mut events = Vec::new();
        {
            let mut conn = self.lock();
            if conn.epoch != epoch {
                return err;
            }
            error!("WebSocket authentication failed: {}", err);
            conn.state = ConnectionState::Failed;
            events.push(TransportEvent::Error(err.clone()));
            if conn.reconnect_attempts > 0 {
                events.push(TransportEvent::ReconnectFailed {
                    attempts: conn.reconnect_attempts,
                });
            }
        }
        self.emit_all(events);
        err
    }

    /// Roll back a connect that could not be started. Queued messages stay.
    fn abandon_connect(&self, epoch: u64, reason: String) -> Option<TransportEvent> {
        let mut conn = self.lock();
        if conn.epoch != epoch || conn.state != ConnectionState::Connecting {
            return None;
        }
        warn!("Cannot start connect attempt: {}", reason);
        conn.state = ConnectionState::Disconnected;
        conn.epoch += 1;
        Some(TransportEvent::Error(SyftError::ConnectionFailed {
            message: format!("no async runtime to connect on: {}", reason),
        }))
    }

    /// A first connect fails outright; an open inside a reconnect cycle counts
    /// as another abnormal closure.
    fn open_failed(self: &Arc<Self>, epoch: u64, err: SyftError) -> SyftError {
        let mut events = vec![TransportEvent::Error(err.clone())];
        {
            let mut conn = self.lock();
            if conn.epoch != epoch {
                return err;
            }
            warn!("WebSocket open failed: {}", err);
            if conn.reconnect_attempts > 0 {
                self.schedule_reconnect(&mut conn, &mut events);
            } else {
                conn.state = ConnectionState::Failed;
            }
        }
        self.emit_all(events);
        err
    }

    fn on_open(self: &Arc<Self>, epoch: u64, handle: SocketHandle) {
        let SocketHandle { outbound, inbound } = handle;
        let mut events = Vec::new();
        {
            let mut conn = self.lock();
            if conn.epoch != epoch || conn.state != ConnectionState::Connecting {
                debug!("Dropping socket opened for stale attempt {}", epoch);
                let _ = outbound.send(OutboundFrame::Close {
                    code: TransportDefaults::NORMAL_CLOSURE,
                    reason: "superseded".to_string(),
                });
                return;
            }

            let attempts = conn.reconnect_attempts;
            conn.reconnect_attempts = 0;
            conn.state = ConnectionState::Connected;
            info!("Connected to {}", self.config.server_url);

            // Queued messages go out before anything sent after this point.
            while let Some(message) = conn.queue.pop_front() {
                if let Err(e) = write_message(&outbound, &message) {
                    if matches!(e, SyftError::SendFailed { .. }) {
                        // Socket died mid-flush; keep the rest for the next connection.
                        conn.queue.push_front(message);
                        events.push(TransportEvent::Error(e));
                        break;
                    }
                    events.push(TransportEvent::Error(e));
                }
            }

            let weak = Arc::downgrade(self);
            conn.reader = Some(tokio::spawn(read_loop(weak.clone(), epoch, inbound)));
            let period = self.config.heartbeat_interval;
            if !period.is_zero() {
                conn.heartbeat = Some(tokio::spawn(heartbeat_loop(weak, epoch, period)));
            }
            conn.socket = Some(outbound);

            events.push(TransportEvent::Connected);
            if attempts > 0 {
                info!("Reconnected after {} attempt(s)", attempts);
                events.push(TransportEvent::Reconnected { attempts });
            }
        }
        self.emit_all(events);
    }

    fn on_frame(&self, epoch: u64, text: &str) {
        if self.lock().epoch != epoch {
            return;
        }
        let event = match Message::decode(text) {
            Ok(message) => TransportEvent::Message(message),
            Err(e) => {
                warn!("Discarding inbound frame: {}", e);
                TransportEvent::Error(e)
            }
        };
        self.listeners.emit(&event);
    }

    fn on_close(self: &Arc<Self>, epoch: u64, code: u16, reason: String) {
        let mut events = Vec::new();
        {
            let mut conn = self.lock();
            if conn.epoch != epoch || conn.state != ConnectionState::Connected {
                return;
            }
            conn.socket = None;
            if let Some(heartbeat) = conn.heartbeat.take() {
                heartbeat.abort();
            }
            // The reader is the caller; detach rather than abort it.
            conn.reader = None;

            events.push(TransportEvent::Disconnected {
                code,
                reason: reason.clone(),
            });
            if code == TransportDefaults::NORMAL_CLOSURE {
                info!("Connection closed normally: {}", reason);
                conn.state = ConnectionState::Disconnected;
                conn.queue.clear();
                conn.reconnect_attempts = 0;
            } else {
                warn!("Connection closed abnormally ({}): {}", code, reason);
                self.schedule_reconnect(&mut conn, &mut events);
            }
        }
        self.emit_all(events);
    }

    /// Schedule the next reconnect, or give up once the budget is spent.
    fn schedule_reconnect(self: &Arc<Self>, conn: &mut Connection, events: &mut Vec<TransportEvent>) {
        if conn.reconnect_attempts >= self.config.max_reconnect_attempts {
            error!(
                "Giving up after {} reconnect attempt(s)",
                conn.reconnect_attempts
            );
            conn.state = ConnectionState::Failed;
            events.push(TransportEvent::ReconnectFailed {
                attempts: conn.reconnect_attempts,
            });
            return;
        }

        conn.reconnect_attempts += 1;
        let attempt = conn.reconnect_attempts;
        let delay = self.reconnect_policy.delay_for_attempt(attempt);
        conn.state = ConnectionState::Reconnecting;
        conn.epoch += 1;
        info!("Reconnect attempt {} in {:?}", attempt, delay);
        conn.reconnect_timer = Some(tokio::spawn(reconnect_after(
            Arc::downgrade(self),
            conn.epoch,
            delay,
        )));
        events.push(TransportEvent::Reconnecting { attempt, delay });
    }

    /// Returns false once the heartbeat should stop.
    fn send_heartbeat(&self, epoch: u64) -> bool {
        let result = {
            let conn = self.lock();
            if conn.epoch != epoch || conn.state != ConnectionState::Connected {
                return false;
            }
            match &conn.socket {
                Some(socket) => write_message(socket, &Message::heartbeat()),
                None => return false,
            }
        };
        if let Err(e) = result {
            debug!("Heartbeat not sent: {}", e);
            self.listeners.emit(&TransportEvent::Error(e));
        }
        true
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let conn = self
            .conn
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        conn.stop_tasks();
    }
}

fn write_message(socket: &mpsc::UnboundedSender<OutboundFrame>, message: &Message) -> Result<()> {
    let text = message.encode()?;
    socket
        .send(OutboundFrame::Text(text))
        .map_err(|_| SyftError::SendFailed {
            message: format!("socket closed before message {} was written", message.id()),
        })
}

async fn read_loop(inner: Weak<Inner>, epoch: u64, mut inbound: mpsc::UnboundedReceiver<InboundFrame>) {
    while let Some(frame) = inbound.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match frame {
            InboundFrame::Text(text) => inner.on_frame(epoch, &text),
            InboundFrame::Closed { code, reason } => {
                inner.on_close(epoch, code, reason);
                return;
            }
        }
    }
    if let Some(inner) = inner.upgrade() {
        inner.on_close(
            epoch,
            TransportDefaults::ABNORMAL_CLOSURE,
            "socket dropped".to_string(),
        );
    }
}

async fn heartbeat_loop(inner: Weak<Inner>, epoch: u64, period: Duration) {
    let start = tokio::time::Instant::now() + period;
    let mut ticker = tokio::time::interval_at(start, period);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if !inner.send_heartbeat(epoch) {
            return;
        }
    }
}

async fn reconnect_after(inner: Weak<Inner>, epoch: u64, delay: Duration) {
    tokio::time::sleep(delay).await;
    let Some(inner) = inner.upgrade() else {
        return;
    };
    {
        let mut conn = inner.lock();
        if conn.epoch != epoch || conn.state != ConnectionState::Reconnecting {
            return;
        }
        conn.state = ConnectionState::Connecting;
        conn.reconnect_timer = None;
    }
    // Failures are reported through events.
    let _ = inner.open_boxed(epoch).await;
}
