//! `TungsteniteConnector` against a real websocket server.

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use syft_client::{
    Message, MessageType, SyftClient, TransportConfig, TransportEvent, ConnectionState,
};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;

/// Accept one client, ack its first message, then close normally.
async fn spawn_ack_server() -> (Url, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (uri_tx, uri_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let callback = move |request: &Request, response: Response| {
            let _ = uri_tx.send(request.uri().to_string());
            Ok::<Response, ErrorResponse>(response)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .unwrap();

        while let Some(Ok(frame)) = ws.next().await {
            if let WsMessage::Text(text) = frame {
                let incoming: Value = serde_json::from_str(&text).unwrap();
                let ack = json!({"id": incoming["id"], "typ": 4, "dat": {"ok": true}});
                ws.send(WsMessage::Text(ack.to_string())).await.unwrap();
                ws.close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "done".into(),
                }))
                .await
                .unwrap();
                break;
            }
        }
        // Drain until the client finishes the close handshake.
        while let Some(Ok(_)) = ws.next().await {}
    });

    (Url::parse(&format!("http://{}", addr)).unwrap(), uri_rx)
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_round_trip_and_normal_close() {
    let (url, uri_rx) = spawn_ack_server().await;
    let config = TransportConfig::new(url.clone()).with_heartbeat_interval(Duration::ZERO);
    let client = SyftClient::builder(url)
        .with_token("tok")
        .with_transport_config(config)
        .build()
        .unwrap();
    let transport = client.transport();
    let (_, mut events) = transport.subscribe();

    transport.connect().await.unwrap();
    assert!(matches!(next_event(&mut events).await, TransportEvent::Connected));
    assert_eq!(uri_rx.await.unwrap(), "/api/v1/events?token=tok");

    transport.send(Message::new("m1", MessageType::Http, json!({"q": 1})));

    match next_event(&mut events).await {
        TransportEvent::Message(msg) => {
            assert_eq!(msg.id(), "m1");
            assert_eq!(msg.typ(), MessageType::Ack);
            assert_eq!(msg.dat(), &json!({"ok": true}));
        }
        other => panic!("unexpected event: {:?}", other),
    }

    match next_event(&mut events).await {
        TransportEvent::Disconnected { code, reason } => {
            assert_eq!(code, 1000);
            assert_eq!(reason, "done");
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(transport.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_unreachable_server_fails_first_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let url = Url::parse(&format!("http://{}", addr)).unwrap();
    let client = SyftClient::builder(url).with_token("tok").build().unwrap();

    let err = client.transport().connect().await.unwrap_err();
    assert_eq!(err.code(), "WEBSOCKET_CONNECTION_FAILED");
    assert_eq!(
        client.transport().connection_state(),
        ConnectionState::Failed
    );
}
