//! Connection manager behaviour against an in-memory socket connector.

use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use syft_client::transport::{
    socket_pair, ConnectionState, OutboundFrame, RemoteSocket, SocketConnector, SocketHandle,
    TransportEvent,
};
use syft_client::{
    ConnectionManager, Message, MessageType, Result, StaticTokenAuth, SyftError, TransportConfig,
};
use tokio::sync::mpsc;
use url::Url;

/// What the next `open()` call does.
enum Script {
    Accept,
    Refuse,
    /// Never completes.
    Hang,
}

struct ScriptedConnector {
    script: Mutex<VecDeque<Script>>,
    /// Used once the script runs out.
    fallback_accept: bool,
    opens: AtomicU32,
    urls: Mutex<Vec<Url>>,
    remotes: mpsc::UnboundedSender<RemoteSocket>,
}

#[async_trait]
impl SocketConnector for ScriptedConnector {
    async fn open(&self, url: &Url) -> Result<SocketHandle> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.clone());
        let step = self.script.lock().unwrap().pop_front();
        let accept = match step {
            Some(Script::Accept) => true,
            Some(Script::Refuse) => false,
            Some(Script::Hang) => futures::future::pending().await,
            None => self.fallback_accept,
        };
        if !accept {
            return Err(SyftError::ConnectionFailed {
                message: "connection refused".to_string(),
            });
        }
        let (handle, remote) = socket_pair();
        let _ = self.remotes.send(remote);
        Ok(handle)
    }
}

struct Harness {
    manager: ConnectionManager,
    connector: Arc<ScriptedConnector>,
    remotes: mpsc::UnboundedReceiver<RemoteSocket>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    auth: Arc<StaticTokenAuth>,
}

fn config() -> TransportConfig {
    TransportConfig::new(Url::parse("https://syftbox.net").unwrap())
        .with_max_reconnect_attempts(3)
        .with_initial_reconnect_delay(Duration::from_millis(100))
        .with_backoff_factor(2.0)
        .with_max_reconnect_delay(Duration::from_secs(1))
        .with_heartbeat_interval(Duration::ZERO)
}

fn harness(config: TransportConfig, script: Vec<Script>, fallback_accept: bool) -> Harness {
    let (tx, remotes) = mpsc::unbounded_channel();
    let connector = Arc::new(ScriptedConnector {
        script: Mutex::new(script.into()),
        fallback_accept,
        opens: AtomicU32::new(0),
        urls: Mutex::new(Vec::new()),
        remotes: tx,
    });
    let auth = Arc::new(StaticTokenAuth::new("secret-token"));
    let manager = ConnectionManager::new(config, auth.clone(), connector.clone());
    let (_, events) = manager.subscribe();
    Harness {
        manager,
        connector,
        remotes,
        events,
        auth,
    }
}

fn message(id: &str) -> Message {
    Message::new(id, MessageType::FileWrite, json!({"path": id}))
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(60), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Skip events until one matches.
async fn wait_for<F>(events: &mut mpsc::UnboundedReceiver<TransportEvent>, matches: F) -> TransportEvent
where
    F: Fn(&TransportEvent) -> bool,
{
    loop {
        let event = next_event(events).await;
        if matches(&event) {
            return event;
        }
    }
}

async fn next_text(remote: &mut RemoteSocket) -> String {
    match remote.next_written().await {
        Some(OutboundFrame::Text(text)) => text,
        other => panic!("expected a text frame, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_connect_uses_token_in_events_url() {
    let mut h = harness(config(), vec![], true);
    h.manager.connect().await.unwrap();

    assert!(h.manager.is_connected());
    assert!(matches!(next_event(&mut h.events).await, TransportEvent::Connected));
    let urls = h.connector.urls.lock().unwrap().clone();
    assert_eq!(
        urls[0].as_str(),
        "wss://syftbox.net/api/v1/events?token=secret-token"
    );
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_with_backoff_then_fails_once() {
    let mut h = harness(config(), vec![Script::Accept], false);
    h.manager.connect().await.unwrap();
    let remote = h.remotes.recv().await.unwrap();

    assert!(remote.close(1006, "network lost"));

    let mut delays = Vec::new();
    let mut failures = 0;
    loop {
        match next_event(&mut h.events).await {
            TransportEvent::Reconnecting { attempt, delay } => {
                assert_eq!(attempt as usize, delays.len() + 1);
                delays.push(delay);
            }
            TransportEvent::ReconnectFailed { attempts } => {
                assert_eq!(attempts, 3);
                failures += 1;
                break;
            }
            _ => {}
        }
    }

    assert_eq!(
        delays,
        vec![
            Duration::from_millis(200),
            Duration::from_millis(400),
            Duration::from_millis(800)
        ]
    );
    assert_eq!(failures, 1);
    assert_eq!(h.manager.connection_state(), ConnectionState::Failed);
    // Initial open plus three reconnects.
    assert_eq!(h.connector.opens.load(Ordering::SeqCst), 4);

    // Nothing else happens while failed.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.connector.opens.load(Ordering::SeqCst), 4);
    while let Ok(event) = h.events.try_recv() {
        assert!(!matches!(event, TransportEvent::ReconnectFailed { .. }));
    }
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_delay_is_capped() {
    let config = config()
        .with_max_reconnect_attempts(5)
        .with_max_reconnect_delay(Duration::from_millis(500));
    let mut h = harness(config, vec![Script::Accept], false);
    h.manager.connect().await.unwrap();
    let remote = h.remotes.recv().await.unwrap();
    remote.close(1011, "server error");

    let mut delays = Vec::new();
    loop {
        match next_event(&mut h.events).await {
            TransportEvent::Reconnecting { delay, .. } => delays.push(delay.as_millis()),
            TransportEvent::ReconnectFailed { .. } => break,
            _ => {}
        }
    }
    assert_eq!(delays, vec![200, 400, 500, 500, 500]);
}

#[tokio::test(start_paused = true)]
async fn test_successful_reconnect_emits_reconnected() {
    let mut h = harness(config(), vec![], true);
    h.manager.connect().await.unwrap();
    let first = h.remotes.recv().await.unwrap();
    first.close(1006, "");

    let event = wait_for(&mut h.events, |e| {
        matches!(e, TransportEvent::Reconnected { .. })
    })
    .await;
    assert!(matches!(event, TransportEvent::Reconnected { attempts: 1 }));
    assert!(h.manager.is_connected());
    assert_eq!(h.manager.reconnect_attempts(), 0);
    assert_eq!(h.connector.opens.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_clean_close_never_reconnects() {
    let mut h = harness(config(), vec![], true);
    h.manager.connect().await.unwrap();
    let remote = h.remotes.recv().await.unwrap();
    remote.close(1000, "bye");

    let event = wait_for(&mut h.events, |e| {
        matches!(e, TransportEvent::Disconnected { .. })
    })
    .await;
    assert!(matches!(event, TransportEvent::Disconnected { code: 1000, .. }));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.manager.connection_state(), ConnectionState::Disconnected);
    assert_eq!(h.connector.opens.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_queued_messages_flush_in_order_before_new_sends() {
    let mut h = harness(config(), vec![], true);

    // First send while disconnected starts exactly one connect.
    h.manager.send(message("m1"));
    h.manager.send(message("m2"));
    h.manager.send(message("m3"));

    wait_for(&mut h.events, |e| matches!(e, TransportEvent::Connected)).await;
    h.manager.send(message("m4"));

    let mut remote = h.remotes.recv().await.unwrap();
    let mut ids = Vec::new();
    for _ in 0..4 {
        let frame = next_text(&mut remote).await;
        ids.push(Message::decode(&frame).unwrap().id().to_string());
    }
    assert_eq!(ids, vec!["m1", "m2", "m3", "m4"]);
    assert_eq!(h.connector.opens.load(Ordering::SeqCst), 1);
    assert_eq!(h.manager.queued_messages(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_messages_sent_while_reconnecting_are_kept() {
    let mut h = harness(config(), vec![], true);
    h.manager.connect().await.unwrap();
    let first = h.remotes.recv().await.unwrap();
    first.close(1006, "");
    wait_for(&mut h.events, |e| {
        matches!(e, TransportEvent::Reconnecting { .. })
    })
    .await;

    h.manager.send(message("late"));
    assert_eq!(h.manager.queued_messages(), 1);
    assert_eq!(h.manager.connection_state(), ConnectionState::Reconnecting);

    let mut second = h.remotes.recv().await.unwrap();
    let frame = next_text(&mut second).await;
    assert_eq!(Message::decode(&frame).unwrap().id(), "late");
    assert_eq!(h.connector.opens.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_queue_evicts_oldest_and_failed_does_not_autoconnect() {
    let config = config().with_max_queue_size(2);
    let mut h = harness(config, vec![], true);
    h.auth.clear();

    h.manager.send(message("a"));
    let event = wait_for(&mut h.events, |e| matches!(e, TransportEvent::Error(_))).await;
    match event {
        TransportEvent::Error(err) => assert_eq!(err.code(), "WEBSOCKET_AUTHENTICATION_FAILED"),
        _ => unreachable!(),
    }
    assert_eq!(h.manager.connection_state(), ConnectionState::Failed);
    assert_eq!(h.connector.opens.load(Ordering::SeqCst), 0);

    h.manager.send(message("b"));
    h.manager.send(message("c"));
    assert_eq!(h.manager.queued_messages(), 2);
    assert_eq!(h.manager.connection_state(), ConnectionState::Failed);

    h.auth.set_token("fresh");
    h.manager.connect().await.unwrap();
    let mut remote = h.remotes.recv().await.unwrap();
    assert_eq!(Message::decode(&next_text(&mut remote).await).unwrap().id(), "b");
    assert_eq!(Message::decode(&next_text(&mut remote).await).unwrap().id(), "c");
}

#[tokio::test(start_paused = true)]
async fn test_first_open_failure_moves_to_failed() {
    let mut h = harness(config(), vec![Script::Refuse], true);
    let err = h.manager.connect().await.unwrap_err();
    assert_eq!(err.code(), "WEBSOCKET_CONNECTION_FAILED");
    assert_eq!(h.manager.connection_state(), ConnectionState::Failed);
    assert!(matches!(next_event(&mut h.events).await, TransportEvent::Error(_)));

    // An explicit connect restarts the cycle.
    h.manager.connect().await.unwrap();
    assert!(h.manager.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_dropped_connect_still_settles_state() {
    let config = config().with_connect_timeout(Duration::from_secs(10));
    let mut h = harness(config, vec![Script::Hang], true);

    // The caller gives up long before the connect deadline.
    let gave_up = tokio::time::timeout(Duration::from_secs(1), h.manager.connect()).await;
    assert!(gave_up.is_err());

    // The attempt keeps running and fails on its own deadline.
    match wait_for(&mut h.events, |e| matches!(e, TransportEvent::Error(_))).await {
        TransportEvent::Error(e) => assert_eq!(e.code(), "WEBSOCKET_CONNECTION_FAILED"),
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(h.manager.connection_state(), ConnectionState::Failed);

    // A later connect opens a fresh socket.
    h.manager.connect().await.unwrap();
    assert!(h.manager.is_connected());
    assert_eq!(h.connector.opens.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_frame_keeps_connection() {
    let mut h = harness(config(), vec![], true);
    h.manager.connect().await.unwrap();
    let remote = h.remotes.recv().await.unwrap();

    remote.push_text("{not json");
    remote.push_text(r#"{"id":"in-1","typ":4,"dat":{"ok":true}}"#);

    let event = wait_for(&mut h.events, |e| matches!(e, TransportEvent::Error(_))).await;
    match event {
        TransportEvent::Error(err) => assert!(matches!(err, SyftError::MalformedFrame { .. })),
        _ => unreachable!(),
    }
    let event = wait_for(&mut h.events, |e| matches!(e, TransportEvent::Message(_))).await;
    match event {
        TransportEvent::Message(msg) => {
            assert_eq!(msg.id(), "in-1");
            assert_eq!(msg.typ(), MessageType::Ack);
        }
        _ => unreachable!(),
    }
    assert!(h.manager.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_reconnect() {
    let mut h = harness(config(), vec![], true);
    h.manager.connect().await.unwrap();
    let remote = h.remotes.recv().await.unwrap();
    remote.close(1006, "");
    wait_for(&mut h.events, |e| {
        matches!(e, TransportEvent::Reconnecting { .. })
    })
    .await;

    h.manager.send(message("dropped"));
    h.manager.disconnect();
    assert_eq!(h.manager.connection_state(), ConnectionState::Disconnected);
    assert_eq!(h.manager.queued_messages(), 0);
    assert_eq!(h.manager.reconnect_attempts(), 0);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.connector.opens.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_is_sent_while_connected() {
    let config = config().with_heartbeat_interval(Duration::from_secs(30));
    let mut h = harness(config, vec![], true);
    h.manager.connect().await.unwrap();
    let mut remote = h.remotes.recv().await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(31), next_text(&mut remote))
        .await
        .expect("heartbeat within one interval");
    let heartbeat = Message::decode(&frame).unwrap();
    assert!(heartbeat.is_heartbeat());
    assert_eq!(heartbeat.typ(), MessageType::System);

    h.manager.disconnect();
    // The close frame is the last thing written; no heartbeat after it.
    assert!(matches!(
        remote.next_written().await,
        Some(OutboundFrame::Close { code: 1000, .. })
    ));
    tokio::time::sleep(Duration::from_secs(90)).await;
    assert!(remote.written.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_is_reported_as_event() {
    let mut h = harness(config(), vec![], true);
    h.manager.connect().await.unwrap();
    let remote = h.remotes.recv().await.unwrap();
    let RemoteSocket { written, deliver } = remote;
    drop(written);

    h.manager.send(message("lost"));
    let event = wait_for(&mut h.events, |e| matches!(e, TransportEvent::Error(_))).await;
    match event {
        TransportEvent::Error(err) => assert_eq!(err.code(), "WEBSOCKET_SEND_FAILED"),
        _ => unreachable!(),
    }
    drop(deliver);
}

#[tokio::test(start_paused = true)]
async fn test_removed_listener_stops_receiving() {
    let h = harness(config(), vec![], true);
    let seen = Arc::new(AtomicU32::new(0));
    let counter = seen.clone();
    let id = h.manager.on_event(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    h.manager.connect().await.unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    assert!(h.manager.remove_listener(id));
    h.manager.disconnect();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}
