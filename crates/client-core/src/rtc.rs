//! RTC capability seam
//!
//! The controller never talks to a WebRTC engine directly. It drives an
//! [`RtcPeer`] created by an [`RtcPeerFactory`] and renders through a
//! [`VideoSink`]; applications plug in their engine by implementing these
//! traits.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::mpsc;

use crate::error::ClientResult;

/// STUN server used when the device supplies no RTC configuration
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// ICE server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// A single URL or a list; always normalized to a list
    #[serde(deserialize_with = "one_or_many")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn new(url: impl Into<String>) -> Self {
        Self { urls: vec![url.into()], username: None, credential: None }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(url) => vec![url],
        OneOrMany::Many(urls) => urls,
    })
}

/// Peer connection configuration as reported by the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcConfiguration {
    #[serde(default)]
    pub ice_servers: Vec<IceServer>,
}

impl Default for RtcConfiguration {
    fn default() -> Self {
        Self { ice_servers: vec![IceServer::new(DEFAULT_STUN_SERVER)] }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// A session description handed to or produced by the peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpType::Offer, sdp: sdp.into() }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpType::Answer, sdp: sdp.into() }
    }
}

/// ICE candidate in either direction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for PeerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeerConnectionState::New => "new",
            PeerConnectionState::Connecting => "connecting",
            PeerConnectionState::Connected => "connected",
            PeerConnectionState::Disconnected => "disconnected",
            PeerConnectionState::Failed => "failed",
            PeerConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Inbound media statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RtcStats {
    pub bytes_received: u64,
    pub packets_received: u64,
    pub packets_lost: i64,
    pub frames_decoded: u64,
    pub frames_per_second: Option<f64>,
    pub round_trip_time_ms: Option<f64>,
}

/// Notifications from the peer
#[derive(Debug, Clone, PartialEq)]
pub enum RtcEvent {
    /// A local candidate; `None` marks the end of gathering
    IceCandidate(Option<IceCandidate>),
    TrackAdded { stream_ids: Vec<String> },
    ConnectionStateChanged(PeerConnectionState),
}

/// One peer connection in the answering role
#[async_trait]
pub trait RtcPeer: Send + Sync + 'static {
    async fn set_remote_description(&self, description: SessionDescription) -> ClientResult<()>;

    async fn create_answer(&self) -> ClientResult<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> ClientResult<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> ClientResult<()>;

    async fn get_stats(&self) -> ClientResult<RtcStats>;

    /// Release the connection; must not wait for pending operations
    fn close(&self);
}

/// Creates peers for new sessions
#[async_trait]
pub trait RtcPeerFactory: Send + Sync + 'static {
    async fn create(
        &self,
        config: &RtcConfiguration,
    ) -> ClientResult<(Arc<dyn RtcPeer>, mpsc::UnboundedReceiver<RtcEvent>)>;
}

/// Where remote video is rendered
pub trait VideoSink: Send + Sync + 'static {
    fn attach(&self, stream_ids: &[String]);

    fn detach(&self);
}
