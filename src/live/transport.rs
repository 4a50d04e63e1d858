use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::error::LiveError;
use super::messages::ClientMessage;

/// Default Live API endpoint
pub const LIVE_API_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Something read off the transport
#[derive(Debug, Clone)]
pub enum InboundFrame {
    /// One JSON message
    Text(String),
    /// The connection ended; no further frames follow
    Closed { code: Option<u16>, reason: String },
}

/// An open connection, as a pair of channels.
///
/// Dropping `outbound` closes the connection.
pub struct TransportConnection {
    pub outbound: mpsc::Sender<ClientMessage>,
    pub inbound: mpsc::Receiver<InboundFrame>,
}

/// Opens connections to the inference service
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self) -> Result<TransportConnection, LiveError>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// WebSocket transport to the Live API
pub struct WebSocketTransport {
    url: String,
    api_key: String,
    channel_capacity: usize,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            channel_capacity: 256,
        }
    }

    fn build_url(&self) -> String {
        let sep = if self.url.contains('?') { "&" } else { "?" };
        format!("{}{}key={}", self.url, sep, self.api_key)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self) -> Result<TransportConnection, LiveError> {
        info!("Connecting to {}", self.url);

        let (ws, _response) = tokio_tungstenite::connect_async(self.build_url())
            .await
            .map_err(|e| LiveError::Transport(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientMessage>(self.channel_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel::<InboundFrame>(self.channel_capacity);

        // Writer task: serialize outbound messages onto the socket
        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(j) => j,
                    Err(e) => {
                        error!("Failed to serialize outbound message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(json)).await {
                    warn!("WebSocket send failed: {}", e);
                    break;
                }
            }
            // Sender dropped: close politely
            let _ = sink.close().await;
            debug!("WebSocket writer stopped");
        });

        // Reader task: forward text and binary JSON frames
        tokio::spawn(async move {
            let mut closed = None;
            while let Some(msg) = stream.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Ignoring non UTF-8 binary frame: {}", e);
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        closed = Some(match frame {
                            Some(f) => InboundFrame::Closed {
                                code: Some(u16::from(f.code)),
                                reason: f.reason.to_string(),
                            },
                            None => InboundFrame::Closed {
                                code: None,
                                reason: "closed by server".to_string(),
                            },
                        });
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        closed = Some(InboundFrame::Closed {
                            code: None,
                            reason: e.to_string(),
                        });
                        break;
                    }
                };
                if inbound_tx.send(InboundFrame::Text(text)).await.is_err() {
                    return;
                }
            }

            let frame = closed.unwrap_or(InboundFrame::Closed {
                code: None,
                reason: "stream ended".to_string(),
            });
            let _ = inbound_tx.send(frame).await;
            debug!("WebSocket reader stopped");
        });

        info!("WebSocket connected");

        Ok(TransportConnection {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }

    fn name(&self) -> &str {
        "websocket"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url_appends_key() {
        let transport = WebSocketTransport::new("wss://example.test/live", "secret");
        assert_eq!(transport.build_url(), "wss://example.test/live?key=secret");
    }

    #[test]
    fn test_build_url_with_existing_query() {
        let transport = WebSocketTransport::new("wss://example.test/live?alt=json", "secret");
        assert_eq!(transport.build_url(), "wss://example.test/live?alt=json&key=secret");
    }
}
