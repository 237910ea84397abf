//! Error types for the client-core library
//!
//! Errors are grouped so callers can pick a recovery strategy:
//!
//! - **Connection errors** - the socket could not be opened or was lost;
//!   usually recoverable by reconnecting
//! - **Protocol errors** - the device answered with something unexpected
//! - **Request errors** - a correlated request was refused or timed out
//! - **Media errors** - the RTC capability failed during negotiation
//! - **Configuration errors** - invalid settings or parameter values; fix
//!   the input before retrying
//! - **State errors** - the operation is not valid in the current session state
//!
//! ```rust,no_run
//! # use rws_client_core::{ClientError, SessionController};
//! # async fn example(controller: SessionController) {
//! match controller.device_info().await {
//!     Ok(info) => println!("device {}", info.deviceid),
//!     Err(e) if e.is_recoverable() => eprintln!("temporary failure: {e}"),
//!     Err(ClientError::InvalidState { expected, actual }) => {
//!         eprintln!("not ready: expected {expected}, session is {actual}");
//!     }
//!     Err(e) => eprintln!("{} error: {e}", e.category()),
//! }
//! # }
//! ```

use rws_sdp_core::SdpError;
use rws_signaling_core::{ErrorKind, SignalingError};
use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error("Connect failed: {reason}")]
    ConnectFailed { reason: String },

    #[error("Signaling channel is not connected")]
    NotConnected,

    #[error("Network error: {reason}")]
    NetworkError { reason: String },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Signaling protocol error: {reason}")]
    ProtocolError { reason: String },

    #[error("Request {request} failed: {reason}")]
    RequestFailed { request: String, reason: String },

    #[error("Another request is in flight: {transaction}")]
    RequestInFlight { transaction: String },

    #[error("Operation timeout after {duration_ms}ms")]
    OperationTimeout { duration_ms: u64 },

    #[error("Media negotiation failed: {reason}")]
    MediaNegotiationFailed { reason: String },

    #[error("Invalid session description: {reason}")]
    InvalidSdp { reason: String },

    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfiguration { field: String, reason: String },

    #[error("Configuration file {path}: {reason}")]
    ConfigLoad { path: String, reason: String },

    #[error("Invalid argument {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    #[error("Invalid session state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("No active session")]
    NoSession,

    #[error("{operation} cancelled")]
    Cancelled { operation: String },

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl ClientError {
    pub fn connect_failed(reason: impl Into<String>) -> Self {
        Self::ConnectFailed { reason: reason.into() }
    }

    pub fn network_error(reason: impl Into<String>) -> Self {
        Self::NetworkError { reason: reason.into() }
    }

    pub fn protocol_error(reason: impl Into<String>) -> Self {
        Self::ProtocolError { reason: reason.into() }
    }

    pub fn request_failed(request: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RequestFailed { request: request.into(), reason: reason.into() }
    }

    pub fn media_negotiation_failed(reason: impl Into<String>) -> Self {
        Self::MediaNegotiationFailed { reason: reason.into() }
    }

    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration { field: field.into(), reason: reason.into() }
    }

    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument { field: field.into(), reason: reason.into() }
    }

    pub fn invalid_state(expected: impl Into<String>, actual: impl ToString) -> Self {
        Self::InvalidState { expected: expected.into(), actual: actual.to_string() }
    }

    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled { operation: operation.into() }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError { message: message.into() }
    }

    /// Whether retrying the same operation later can succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            ClientError::ConnectFailed { .. }
            | ClientError::NetworkError { .. }
            | ClientError::ConnectionClosed
            | ClientError::RequestInFlight { .. }
            | ClientError::OperationTimeout { .. } => true,

            ClientError::InvalidConfiguration { .. }
            | ClientError::ConfigLoad { .. }
            | ClientError::InvalidArgument { .. }
            | ClientError::InvalidSdp { .. } => false,

            _ => false,
        }
    }

    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectFailed { .. }
                | ClientError::NotConnected
                | ClientError::NetworkError { .. }
                | ClientError::ConnectionClosed
        )
    }

    pub fn category(&self) -> &'static str {
        match self {
            ClientError::ConnectFailed { .. }
            | ClientError::NotConnected
            | ClientError::NetworkError { .. }
            | ClientError::ConnectionClosed => "connection",

            ClientError::ProtocolError { .. } => "protocol",

            ClientError::RequestFailed { .. }
            | ClientError::RequestInFlight { .. }
            | ClientError::OperationTimeout { .. } => "request",

            ClientError::MediaNegotiationFailed { .. } | ClientError::InvalidSdp { .. } => "media",

            ClientError::InvalidConfiguration { .. }
            | ClientError::ConfigLoad { .. }
            | ClientError::InvalidArgument { .. } => "configuration",

            ClientError::InvalidState { .. } | ClientError::NoSession | ClientError::Cancelled { .. } => "state",

            ClientError::InternalError { .. } => "internal",
        }
    }
}

impl From<SignalingError> for ClientError {
    fn from(err: SignalingError) -> Self {
        match err {
            SignalingError::NotConnected => ClientError::NotConnected,
            SignalingError::ConnectionClosed | SignalingError::ChannelClosed => {
                ClientError::ConnectionClosed
            }
            SignalingError::ConnectFailed { url, reason } => {
                ClientError::connect_failed(format!("{url}: {reason}"))
            }
            SignalingError::RequestInFlight { transaction } => {
                ClientError::RequestInFlight { transaction: transaction.to_string() }
            }
            SignalingError::Timeout { duration_ms, .. } => ClientError::OperationTimeout { duration_ms },
            SignalingError::RequestFailed { reason } => ClientError::request_failed("request", reason),
            SignalingError::InvalidArgument { field, reason } => ClientError::InvalidArgument { field, reason },
            other => match other.kind() {
                ErrorKind::Transport => ClientError::network_error(other.to_string()),
                ErrorKind::Usage => ClientError::invalid_state("open channel", other.to_string()),
                _ => ClientError::protocol_error(other.to_string()),
            },
        }
    }
}

impl From<SdpError> for ClientError {
    fn from(err: SdpError) -> Self {
        ClientError::InvalidSdp { reason: err.to_string() }
    }
}
