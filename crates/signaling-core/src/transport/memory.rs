//! In-process transport
//!
//! [`MemoryTransport`] is the client half; every successful `connect` yields
//! a [`MemoryPeer`] on the paired [`MemoryListener`], which plays the server.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use super::{Transport, TransportConnection, TransportEvent};
use crate::error::{SignalingError, SignalingResult};

/// Client side of the in-memory transport
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    accept: mpsc::UnboundedSender<MemoryPeer>,
    refuse: Arc<AtomicBool>,
}

/// Accepts connections made through a [`MemoryTransport`]
#[derive(Debug)]
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// Server end of one in-memory connection
#[derive(Debug)]
pub struct MemoryPeer {
    url: String,
    to_client: mpsc::UnboundedSender<TransportEvent>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl MemoryTransport {
    pub fn new() -> (Self, MemoryListener) {
        let (accept, incoming) = mpsc::unbounded_channel();
        (
            Self { accept, refuse: Arc::new(AtomicBool::new(false)) },
            MemoryListener { incoming },
        )
    }

    /// Make subsequent connects fail as if the server were down
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, url: &str) -> SignalingResult<TransportConnection> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(SignalingError::ConnectFailed {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let (outbound, from_client) = mpsc::unbounded_channel();
        let (to_client, inbound) = mpsc::unbounded_channel();
        let peer = MemoryPeer { url: url.to_string(), to_client, from_client };

        self.accept.send(peer).map_err(|_| SignalingError::ConnectFailed {
            url: url.to_string(),
            reason: "listener dropped".to_string(),
        })?;

        Ok(TransportConnection { outbound, inbound })
    }
}

impl MemoryListener {
    /// Next accepted connection
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.incoming.recv().await
    }
}

impl MemoryPeer {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Next frame written by the client; `None` once the client hung up
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Next client frame decoded as JSON
    pub async fn recv_json(&mut self) -> Option<serde_json::Value> {
        let frame = self.recv().await?;
        serde_json::from_str(&frame).ok()
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client.send(TransportEvent::Message(text.into())).is_ok()
    }

    pub fn send_json<T: Serialize>(&self, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(text) => self.send_text(text),
            Err(_) => false,
        }
    }

    /// Close from the server side
    pub fn close(&self, code: Option<u16>, reason: impl Into<String>) {
        let _ = self.to_client.send(TransportEvent::Closed { code, reason: reason.into() });
    }

    /// Fail the connection from the server side
    pub fn fail(&self, reason: impl Into<String>) {
        let _ = self.to_client.send(TransportEvent::Error(reason.into()));
    }
}
