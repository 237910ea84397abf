//! WebSocket transport
//!
//! One writer task drains the outbound queue into the socket, one reader task
//! turns socket frames into [`TransportEvent`]s. When the outbound sender is
//! dropped the writer sends a close frame and exits.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, trace, warn};

use super::{Transport, TransportConnection, TransportEvent};
use crate::error::{SignalingError, SignalingResult};

/// WebSocket client transport
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport {
    dump_traffic: bool,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log every frame at trace level
    pub fn with_dump_traffic(mut self, dump_traffic: bool) -> Self {
        self.dump_traffic = dump_traffic;
        self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &str) -> SignalingResult<TransportConnection> {
        let (ws_stream, _) = connect_async(url).await.map_err(|e| SignalingError::ConnectFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        debug!(url, "Signaling websocket connected");

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel::<TransportEvent>();
        let dump_traffic = self.dump_traffic;

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if dump_traffic {
                    trace!(direction = "out", frame = %frame, "ws frame");
                }
                if let Err(e) = ws_write.send(Message::text(frame)).await {
                    warn!(error = %e, "Signaling websocket write failed");
                    return;
                }
            }
            let _ = ws_write.close().await;
            debug!("Signaling websocket writer finished");
        });

        tokio::spawn(async move {
            let event = loop {
                let Some(message) = ws_read.next().await else {
                    break TransportEvent::Closed { code: None, reason: "stream ended".to_string() };
                };
                match message {
                    Ok(Message::Text(text)) => {
                        if dump_traffic {
                            trace!(direction = "in", frame = %text.as_str(), "ws frame");
                        }
                        if inbound_tx.send(TransportEvent::Message(text.as_str().to_owned())).is_err() {
                            return;
                        }
                    }
                    Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => {
                            if inbound_tx.send(TransportEvent::Message(text)).is_err() {
                                return;
                            }
                        }
                        Err(_) => warn!(len = data.len(), "Dropping non-UTF-8 binary frame"),
                    },
                    Ok(Message::Close(frame)) => {
                        break match frame {
                            Some(frame) => TransportEvent::Closed {
                                code: Some(u16::from(frame.code)),
                                reason: frame.reason.as_str().to_owned(),
                            },
                            None => TransportEvent::Closed { code: None, reason: String::new() },
                        };
                    }
                    Ok(_) => {}
                    Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
                        break TransportEvent::Closed { code: None, reason: "connection closed".to_string() };
                    }
                    Err(e) => break TransportEvent::Error(e.to_string()),
                }
            };
            debug!(?event, "Signaling websocket reader finished");
            let _ = inbound_tx.send(event);
        });

        Ok(TransportConnection { outbound, inbound })
    }
}
