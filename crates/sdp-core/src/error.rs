//! Error types for SDP parsing and rewriting
//!
//! Only malformed input is an error here. An absent media line, codec or
//! payload is not: the rewrite operations in [`crate::policy`] treat those as
//! identity transforms and never return `Err` for them.

use thiserror::Error;

/// Result type alias for sdp-core operations
pub type SdpResult<T> = Result<T, SdpError>;

/// Errors raised while parsing or editing a session description
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SdpError {
    /// A line does not follow the `<type>=<value>` grammar
    #[error("Malformed SDP line {index}: {line:?}")]
    MalformedLine { index: usize, line: String },

    /// A positional edit addressed a line that does not exist
    #[error("Line index {index} out of range for document of {len} lines")]
    LineOutOfRange { index: usize, len: usize },

    /// An `m=` line could not be split into media type, transport and formats
    #[error("Invalid media line: {reason}")]
    InvalidMediaLine { reason: String },

    /// An `a=rtpmap` or `a=fmtp` attribute did not match its grammar
    #[error("Invalid {attribute} attribute: {line:?}")]
    InvalidAttribute { attribute: &'static str, line: String },
}

impl SdpError {
    /// Create an invalid media line error
    pub fn invalid_media_line(reason: impl Into<String>) -> Self {
        Self::InvalidMediaLine { reason: reason.into() }
    }

    /// Create an invalid attribute error
    pub fn invalid_attribute(attribute: &'static str, line: impl Into<String>) -> Self {
        Self::InvalidAttribute { attribute, line: line.into() }
    }
}
