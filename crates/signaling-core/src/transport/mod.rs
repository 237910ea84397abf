//! Transport seam for the signaling channel
//!
//! The channel only needs an ordered, reliable, text-frame pipe. A
//! [`Transport`] opens one and hands back a [`TransportConnection`]: an
//! outbound queue for frames to write and an inbound stream of
//! [`TransportEvent`]s. Dropping the outbound sender closes the connection.
//!
//! - [`WebSocketTransport`] - tokio-tungstenite client (feature `ws`)
//! - [`MemoryTransport`] - in-process pipe driven by a test server

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::SignalingResult;

pub mod memory;
#[cfg(feature = "ws")]
pub mod websocket;

pub use memory::{MemoryListener, MemoryPeer, MemoryTransport};
#[cfg(feature = "ws")]
pub use websocket::WebSocketTransport;

/// Something that happened on an open connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One text frame
    Message(String),
    /// The peer closed the connection
    Closed { code: Option<u16>, reason: String },
    /// The connection failed; no further events follow
    Error(String),
}

/// Both halves of an open connection
#[derive(Debug)]
pub struct TransportConnection {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens text-frame connections
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Resolve once the connection is open; fail if it never opens
    async fn connect(&self, url: &str) -> SignalingResult<TransportConnection>;
}
