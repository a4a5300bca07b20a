//! Stanza gateway transport.
//!
//! The gateway is a sidecar that terminates the chat protocol and exposes the
//! session as JSON frames over a WebSocket:
//!
//! - client → gateway: `{"op": "auth", "jid", "password", "resource", "status", "status_message"}`,
//!   then one tagged [`Outbound`] frame per send
//! - gateway → client: `{"op": "ready", "jid": "<full address>"}` or
//!   `{"op": "error", "message": "..."}` after auth, then one tagged [`Event`]
//!   frame per inbound stanza

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{Connector, Credentials, Transport, TransportError, TransportResult};
use crate::event::{Event, Outbound};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to a stanza gateway.
#[derive(Debug, Clone)]
pub struct GatewayConnector {
    url: String,
    connect_timeout: Duration,
}

impl GatewayConnector {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
        }
    }

    pub fn from_config(config: &jabot_common::GatewayConfig) -> Self {
        Self::new(&config.url, Duration::from_secs(config.connect_timeout_secs))
    }

    async fn handshake(&self, credentials: &Credentials) -> TransportResult<GatewayTransport> {
        tracing::info!(url = %self.url, jid = %credentials.jid, "Gateway: connecting");

        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.url)
            .await
            .map_err(|e| TransportError::Connection(format!("WebSocket connection failed: {e}")))?;
        let (mut write, mut read) = ws_stream.split();

        let auth = json!({
            "op": "auth",
            "jid": credentials.jid,
            "password": credentials.password,
            "resource": credentials.resource,
            "status": credentials.status,
            "status_message": credentials.status_message,
        });
        write
            .send(Message::Text(auth.to_string()))
            .await
            .map_err(|e| TransportError::Connection(format!("Failed to send auth: {e}")))?;

        let full_jid = loop {
            let frame = match read.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(_))) | None => {
                    return Err(TransportError::Auth("Gateway closed during auth".into()));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(TransportError::Connection(format!("WebSocket error: {e}")));
                }
            };
            let reply: serde_json::Value = serde_json::from_str(&frame)
                .map_err(|e| TransportError::Connection(format!("Invalid auth reply: {e}")))?;
            match reply.get("op").and_then(|o| o.as_str()) {
                Some("ready") => {
                    break reply
                        .get("jid")
                        .and_then(|j| j.as_str())
                        .unwrap_or_default()
                        .to_string();
                }
                Some("error") => {
                    let message = reply
                        .get("message")
                        .and_then(|m| m.as_str())
                        .unwrap_or("unknown error");
                    return Err(TransportError::Auth(message.to_string()));
                }
                other => {
                    tracing::debug!(op = ?other, "Gateway: ignoring frame before ready");
                }
            }
        };

        tracing::info!(jid = %full_jid, "Gateway: session ready");
        Ok(GatewayTransport {
            write: Mutex::new(write),
            read: Mutex::new(read),
        })
    }
}

#[async_trait]
impl Connector for GatewayConnector {
    async fn connect(&self, credentials: &Credentials) -> TransportResult<Arc<dyn Transport>> {
        let transport = tokio::time::timeout(self.connect_timeout, self.handshake(credentials))
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout))??;
        Ok(Arc::new(transport))
    }
}

/// Session over a gateway WebSocket.
pub struct GatewayTransport {
    write: Mutex<SplitSink<WsStream, Message>>,
    read: Mutex<SplitStream<WsStream>>,
}

/// Decode one text frame; `None` for frames that are not events.
fn decode_event(text: &str) -> Option<Event> {
    match serde_json::from_str::<Event>(text) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(error = %e, "Gateway: dropping undecodable frame");
            None
        }
    }
}

#[async_trait]
impl Transport for GatewayTransport {
    fn name(&self) -> &'static str {
        "gateway"
    }

    async fn receive(&self) -> TransportResult<Event> {
        let mut read = self.read.lock().await;
        loop {
            let text = match read.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(_))) | None => return Err(TransportError::Closed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(TransportError::Connection(e.to_string())),
            };
            if let Some(event) = decode_event(&text) {
                return Ok(event);
            }
        }
    }

    async fn send(&self, outbound: Outbound) -> TransportResult<()> {
        let frame = serde_json::to_string(&outbound)
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        self.write
            .lock()
            .await
            .send(Message::Text(frame))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&self) -> TransportResult<()> {
        let mut write = self.write.lock().await;
        let _ = write.send(Message::Close(None)).await;
        write
            .close()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))
    }
}
