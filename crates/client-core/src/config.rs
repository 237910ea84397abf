//! Client configuration
//!
//! [`ClientConfig`] collects everything a [`SessionController`] needs:
//! where the device's signaling endpoint lives, request and connect
//! timeouts, the reconnect policy and the codec preference applied to every
//! negotiated description. Configurations are plain serde structs and load
//! from TOML:
//!
//! ```toml
//! signaling_url = "ws://192.168.0.10/rws/ws"
//! request_timeout_ms = 2000
//!
//! [reconnect]
//! interval_ms = 5000
//! max_attempts = 10
//!
//! [codec]
//! video_codec = "H264/90000"
//! min_kbps = 1000
//! max_kbps = 2500
//! ```
//!
//! [`SessionController`]: crate::SessionController

use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use rws_sdp_core::{CodecPreferencePolicy, MatchMode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ClientError, ClientResult};

/// Path of the signaling endpoint on the device
pub const SIGNALING_PATH: &str = "/rws/ws";

/// Reconnect policy after the signaling channel is lost
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    /// `None` retries until a connect succeeds or the user disconnects
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self { enabled: true, interval_ms: 5000, max_attempts: None }
    }
}

impl ReconnectConfig {
    pub fn disabled() -> Self {
        Self { enabled: false, ..Default::default() }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Codec choices applied to offers and answers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecPreference {
    pub video_codec: String,
    /// Empty means no audio preference
    pub audio_codec: String,
    pub min_kbps: Option<u32>,
    pub max_kbps: Option<u32>,
    /// Compare `name/rate` for equality instead of containment
    pub exact_match: bool,
}

impl Default for CodecPreference {
    fn default() -> Self {
        Self {
            video_codec: "H264/90000".to_string(),
            audio_codec: String::new(),
            min_kbps: None,
            max_kbps: None,
            exact_match: false,
        }
    }
}

impl CodecPreference {
    pub fn to_policy(&self) -> CodecPreferencePolicy {
        CodecPreferencePolicy {
            video_codec: self.video_codec.clone(),
            audio_codec: self.audio_codec.clone(),
            min_kbps: self.min_kbps,
            max_kbps: self.max_kbps,
            match_mode: if self.exact_match { MatchMode::Exact } else { MatchMode::Substring },
        }
    }
}

/// Top-level client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub signaling_url: String,
    /// Default window for correlated requests
    pub request_timeout_ms: u64,
    /// Window for the signaling socket to open
    pub connect_timeout_ms: u64,
    /// Log every signaling frame at trace level
    pub dump_traffic: bool,
    /// Stamped on requests; learned from the device when unset
    pub device_id: Option<String>,
    pub reconnect: ReconnectConfig,
    pub codec: CodecPreference,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            signaling_url: signaling_url("localhost", false),
            request_timeout_ms: 2000,
            connect_timeout_ms: 5000,
            dump_traffic: false,
            device_id: None,
            reconnect: ReconnectConfig::default(),
            codec: CodecPreference::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(signaling_url: impl Into<String>) -> Self {
        Self { signaling_url: signaling_url.into(), ..Default::default() }
    }

    /// Configuration pointing at `host`'s signaling endpoint
    pub fn for_host(host: &str, secure: bool) -> Self {
        Self::new(SignalingUrlBuilder::new(host).secure(secure).build())
    }

    pub fn with_signaling_url(mut self, url: impl Into<String>) -> Self {
        self.signaling_url = url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_codec(mut self, codec: CodecPreference) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_dump_traffic(mut self, dump_traffic: bool) -> Self {
        self.dump_traffic = dump_traffic;
        self
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Check the settings before they reach the controller
    ///
    /// A minimum bitrate above the maximum is accepted; it is clamped when
    /// the answer is rewritten.
    pub fn validate(&self) -> ClientResult<()> {
        let url = Url::parse(&self.signaling_url)
            .map_err(|e| ClientError::invalid_configuration("signaling_url", e.to_string()))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ClientError::invalid_configuration(
                "signaling_url",
                format!("scheme must be ws or wss, got {}", url.scheme()),
            ));
        }
        if url.host_str().is_none() {
            return Err(ClientError::invalid_configuration("signaling_url", "missing host"));
        }
        if self.request_timeout_ms == 0 {
            return Err(ClientError::invalid_configuration("request_timeout_ms", "must be greater than 0"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ClientError::invalid_configuration("connect_timeout_ms", "must be greater than 0"));
        }
        if self.reconnect.enabled && self.reconnect.interval_ms == 0 {
            return Err(ClientError::invalid_configuration("reconnect.interval_ms", "must be greater than 0"));
        }
        Ok(())
    }

    pub fn from_toml_str(text: &str) -> ClientResult<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| ClientError::ConfigLoad { path: "<inline>".to_string(), reason: e.to_string() })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> ClientResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ClientError::ConfigLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config: Self = toml::from_str(&text).map_err(|e| ClientError::ConfigLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ClientResult<String> {
        toml::to_string_pretty(self).map_err(|e| ClientError::internal_error(e.to_string()))
    }
}

/// `ws://<host>/rws/ws`, or `wss://` when `secure`
pub fn signaling_url(host: &str, secure: bool) -> String {
    let scheme = if secure { "wss" } else { "ws" };
    format!("{scheme}://{host}{SIGNALING_PATH}")
}

/// Loopback or RFC 1918 address, or `localhost`
///
/// `host` may carry a port.
pub fn is_private_host(host: &str) -> bool {
    let name = strip_port(host);
    if name.eq_ignore_ascii_case("localhost") {
        return true;
    }
    match name.parse::<Ipv4Addr>() {
        Ok(addr) => addr.is_loopback() || addr.is_private(),
        Err(_) => false,
    }
}

fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

/// Picks the signaling scheme for a host
///
/// Private hosts always get `ws`; public hosts get `wss` when TLS is requested.
#[derive(Debug, Clone)]
pub struct SignalingUrlBuilder {
    host: String,
    secure: bool,
}

impl SignalingUrlBuilder {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into(), secure: false }
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn build(&self) -> String {
        let secure = self.secure && !is_private_host(&self.host);
        signaling_url(&self.host, secure)
    }
}
