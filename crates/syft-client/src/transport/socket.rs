//! Socket seam for the connection manager.
//!
//! A connector opens one socket and hands back a `SocketHandle`: an outbound
//! frame sender plus an inbound frame receiver. The manager owns the handle
//! for exactly one connect attempt and drops it wholesale on the next.
//!
//! The far side of the channels is a `RemoteSocket`. `TungsteniteConnector`
//! pumps a real websocket into it; tests drive it directly.

use crate::config::TransportDefaults;
use crate::Result;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};
use url::Url;

/// Frame written by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    /// Close handshake; nothing is written after it.
    Close { code: u16, reason: String },
}

/// Frame delivered to the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    /// The socket is gone. Always the last frame.
    Closed { code: u16, reason: String },
}

/// Manager side of an open socket.
#[derive(Debug)]
pub struct SocketHandle {
    pub outbound: mpsc::UnboundedSender<OutboundFrame>,
    pub inbound: mpsc::UnboundedReceiver<InboundFrame>,
}

/// Network side of an open socket.
#[derive(Debug)]
pub struct RemoteSocket {
    /// Frames the manager wrote.
    pub written: mpsc::UnboundedReceiver<OutboundFrame>,
    /// Frames to deliver to the manager.
    pub deliver: mpsc::UnboundedSender<InboundFrame>,
}

impl RemoteSocket {
    /// Deliver a text frame. Returns false once the manager dropped the socket.
    pub fn push_text(&self, text: impl Into<String>) -> bool {
        self.deliver.send(InboundFrame::Text(text.into())).is_ok()
    }

    /// Report the socket closed with `code`.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        self.deliver
            .send(InboundFrame::Closed {
                code,
                reason: reason.into(),
            })
            .is_ok()
    }

    /// Next frame written by the manager.
    pub async fn next_written(&mut self) -> Option<OutboundFrame> {
        self.written.recv().await
    }
}

/// Create a connected handle/remote pair.
pub fn socket_pair() -> (SocketHandle, RemoteSocket) {
    let (outbound, written) = mpsc::unbounded_channel();
    let (deliver, inbound) = mpsc::unbounded_channel();
    (
        SocketHandle { outbound, inbound },
        RemoteSocket { written, deliver },
    )
}

/// Opens real-time sockets.
#[async_trait]
pub trait SocketConnector: Send + Sync {
    /// Open a socket to `url`. The manager applies the connect timeout.
    async fn open(&self, url: &Url) -> Result<SocketHandle>;
}

/// WebSocket connector backed by tokio-tungstenite.
#[derive(Debug, Default, Clone)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SocketConnector for TungsteniteConnector {
    async fn open(&self, url: &Url) -> Result<SocketHandle> {
        debug!(
            "Opening websocket to {}://{}{}",
            url.scheme(),
            url.host_str().unwrap_or("unknown"),
            url.path()
        );
        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (mut sink, mut source) = stream.split();
        let (handle, remote) = socket_pair();
        let RemoteSocket {
            mut written,
            deliver,
        } = remote;

        // Writer pump
        tokio::spawn(async move {
            while let Some(frame) = written.recv().await {
                let result = match frame {
                    OutboundFrame::Text(text) => sink.send(WsMessage::Text(text)).await,
                    OutboundFrame::Close { code, reason } => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        let _ = sink.send(WsMessage::Close(Some(frame))).await;
                        break;
                    }
                };
                if let Err(e) = result {
                    warn!("WebSocket write failed: {}", e);
                    break;
                }
            }
        });

        // Reader pump
        tokio::spawn(async move {
            while let Some(next) = source.next().await {
                let frame = match next {
                    Ok(WsMessage::Text(text)) => InboundFrame::Text(text),
                    Ok(WsMessage::Binary(bytes)) => {
                        InboundFrame::Text(String::from_utf8_lossy(&bytes).into_owned())
                    }
                    Ok(WsMessage::Close(close)) => {
                        let (code, reason) = close
                            .map(|f| (u16::from(f.code), f.reason.into_owned()))
                            .unwrap_or((1005, String::new()));
                        let _ = deliver.send(InboundFrame::Closed { code, reason });
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = deliver.send(InboundFrame::Closed {
                            code: TransportDefaults::ABNORMAL_CLOSURE,
                            reason: e.to_string(),
                        });
                        return;
                    }
                };
                if deliver.send(frame).is_err() {
                    return;
                }
            }
            let _ = deliver.send(InboundFrame::Closed {
                code: TransportDefaults::ABNORMAL_CLOSURE,
                reason: "connection lost".to_string(),
            });
        });

        Ok(handle)
    }
}
