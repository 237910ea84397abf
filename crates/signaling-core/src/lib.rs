//! # Transactional signaling channel
//!
//! JSON-over-WebSocket signaling for the rws camera client. One socket
//! carries registration, correlated request/response calls and relayed
//! peer-to-peer signaling.
//!
//! - [`message`] - wire envelopes
//! - [`transaction`] - [`TransactionRegistry`] and single-outcome transactions
//! - [`transport`] - the [`Transport`] seam, WebSocket and in-memory pipes
//! - [`channel`] - [`SignalingChannel`], dispatch and the in-flight slot
//!
//! ## Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "ws")]
//! # async fn example() -> rws_signaling_core::SignalingResult<()> {
//! use std::sync::Arc;
//! use rws_signaling_core::{
//!     ChannelConfig, RequestMessage, RequestType, SignalingChannel, WebSocketTransport,
//! };
//!
//! let channel = SignalingChannel::new(Arc::new(WebSocketTransport::new()), ChannelConfig::default());
//! let mut events = channel.connect("ws://192.168.0.10/rws/ws").await?;
//! channel.register()?;
//!
//! let response = channel.request(RequestMessage::new(RequestType::DeviceId), None).await?;
//! println!("device: {:?}", response.data);
//!
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod error;
pub mod message;
pub mod transaction;
pub mod transport;

pub use channel::{ChannelConfig, ChannelEvent, ChannelState, SignalingChannel};
pub use error::{ErrorKind, SignalingError, SignalingResult};
pub use message::{
    Envelope, RequestMessage, RequestType, ResponseMessage, ResponseResult, ServerEvent,
    SignalingMessage,
};
pub use transaction::{
    DEFAULT_REQUEST_TIMEOUT, Transaction, TransactionHandle, TransactionId, TransactionRegistry,
    TransactionStatus,
};
pub use transport::{
    MemoryListener, MemoryPeer, MemoryTransport, Transport, TransportConnection, TransportEvent,
};
#[cfg(feature = "ws")]
pub use transport::WebSocketTransport;

/// Version of the signaling-core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
