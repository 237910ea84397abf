//! `m=` line view

use std::fmt;

use crate::error::{SdpError, SdpResult};

/// Structured view of one `m=<media> <port> <proto> <fmt> ...` line
///
/// The first three tokens are carried verbatim. Formats stay strings since
/// non-RTP sections (e.g. `webrtc-datachannel`) do not use numeric payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescriptor {
    pub media_type: String,
    /// `m=<media>`, port and protocol tokens
    transport: [String; 3],
    pub payloads: Vec<String>,
}

impl MediaDescriptor {
    /// Parse an `m=` line
    ///
    /// Tokens are split on single spaces, the way browsers emit them.
    pub fn parse(line: &str) -> SdpResult<Self> {
        if !line.starts_with("m=") {
            return Err(SdpError::invalid_media_line(format!("missing m= prefix: {line:?}")));
        }

        let tokens: Vec<&str> = line.split(' ').collect();
        if tokens.len() < 3 {
            return Err(SdpError::invalid_media_line(format!(
                "expected at least 3 tokens, found {}",
                tokens.len()
            )));
        }

        Ok(Self {
            media_type: tokens[0][2..].to_string(),
            transport: [tokens[0].to_string(), tokens[1].to_string(), tokens[2].to_string()],
            payloads: tokens[3..].iter().map(|t| t.to_string()).collect(),
        })
    }

    /// The descriptor with the payload list replaced
    pub fn with_payloads(&self, payloads: Vec<String>) -> Self {
        Self { payloads, ..self.clone() }
    }

    pub fn contains_payload(&self, payload: &str) -> bool {
        self.payloads.iter().any(|p| p == payload)
    }

    pub fn to_line(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MediaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.transport.join(" "))?;
        for payload in &self.payloads {
            write!(f, " {payload}")?;
        }
        Ok(())
    }
}
