use thiserror::Error;

use crate::transaction::TransactionId;

/// A type alias for handling `Result`s with [`SignalingError`]
pub type SignalingResult<T> = std::result::Result<T, SignalingError>;

/// Broad class of a [`SignalingError`]
///
/// Callers use the kind to decide between retrying, reconnecting and
/// reporting a bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Socket error or close; terminal for the channel
    Transport,
    /// Unexpected or malformed envelope from the server
    Protocol,
    /// No response within the transaction window
    Timeout,
    /// Misuse of the channel API (double connect, concurrent request, ...)
    Usage,
    /// Local payload could not be encoded
    MalformedInput,
    /// The server answered with `FAILED`
    Remote,
}

/// Errors that can occur on the signaling channel
///
/// Cloneable so a single channel loss can be delivered to every pending
/// transaction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    /// The transport could not be opened
    #[error("Failed to connect to {url}: {reason}")]
    ConnectFailed { url: String, reason: String },

    /// The transport failed after it was open
    #[error("Transport error: {reason}")]
    Transport { reason: String },

    /// The channel closed while the operation was pending
    #[error("Signaling connection closed")]
    ConnectionClosed,

    /// An operation needs an open channel
    #[error("Internal Error, Signaling connection is not ready")]
    NotConnected,

    /// `connect` was called on a channel that is already open
    #[error("Signaling channel is already connected")]
    AlreadyConnected,

    /// `connect` was called on a channel that has closed; create a new one
    #[error("Signaling channel is closed and cannot be reused")]
    ChannelClosed,

    /// A correlated request is already outstanding on this channel
    #[error("Request already in flight: {transaction}")]
    RequestInFlight { transaction: TransactionId },

    /// No response arrived within the window
    #[error("Transaction {transaction} timed out after {duration_ms}ms")]
    Timeout { transaction: TransactionId, duration_ms: u64 },

    /// The server answered `FAILED`
    #[error("Request failed: {reason}")]
    RequestFailed { reason: String },

    /// An inbound envelope could not be understood
    #[error("Protocol error: {reason}")]
    Protocol { reason: String },

    /// A local value could not be encoded
    #[error("Invalid message: {reason}")]
    InvalidMessage { reason: String },

    /// Caller supplied an out-of-range argument
    #[error("Invalid argument {field}: {reason}")]
    InvalidArgument { field: String, reason: String },
}

impl SignalingError {
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport { reason: reason.into() }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol { reason: reason.into() }
    }

    pub fn request_failed(reason: impl Into<String>) -> Self {
        Self::RequestFailed { reason: reason.into() }
    }

    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument { field: field.into(), reason: reason.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SignalingError::ConnectFailed { .. }
            | SignalingError::Transport { .. }
            | SignalingError::ConnectionClosed => ErrorKind::Transport,

            SignalingError::NotConnected
            | SignalingError::AlreadyConnected
            | SignalingError::ChannelClosed
            | SignalingError::RequestInFlight { .. }
            | SignalingError::InvalidArgument { .. } => ErrorKind::Usage,

            SignalingError::Timeout { .. } => ErrorKind::Timeout,
            SignalingError::RequestFailed { .. } => ErrorKind::Remote,
            SignalingError::Protocol { .. } => ErrorKind::Protocol,
            SignalingError::InvalidMessage { .. } => ErrorKind::MalformedInput,
        }
    }

    /// Whether the channel itself is gone
    pub fn is_transport(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }
}

impl From<serde_json::Error> for SignalingError {
    fn from(e: serde_json::Error) -> Self {
        SignalingError::InvalidMessage { reason: e.to_string() }
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for SignalingError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        SignalingError::ConnectionClosed
    }
}
