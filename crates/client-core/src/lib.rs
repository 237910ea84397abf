//! # Session controller for rws camera streaming
//!
//! `rws-client-core` connects to a camera over the rws signaling protocol,
//! fetches its configuration, and negotiates a receive-only media session
//! through a pluggable RTC engine.
//!
//! - [`controller`] - [`SessionController`], connect/configure/session lifecycle
//!   and reconnect
//! - [`rtc`] - the [`RtcPeer`], [`RtcPeerFactory`] and [`VideoSink`] seam
//! - [`media_config`] - typed device media parameters
//! - [`events`] - [`SessionState`] and [`ClientEvent`]
//! - [`config`] - [`ClientConfig`] with TOML loading
//! - [`logging`] - `tracing` subscriber setup
//! - [`recovery`] - fixed interval retry and timeouts
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # async fn example() -> rws_client_core::ClientResult<()> {
//! use rws_client_core::{ClientConfig, SessionController, StillOptions};
//!
//! let config = ClientConfig::for_host("192.168.0.10", false);
//! let controller = SessionController::builder().config(config).build()?;
//!
//! let mut state = controller.subscribe_state();
//! tokio::spawn(async move {
//!     while state.changed().await.is_ok() {
//!         println!("state: {}", *state.borrow());
//!     }
//! });
//!
//! controller.connect().await?;
//! let image = controller.still_image(StillOptions::default().with_quality(80)).await?;
//! println!("still at {}", image.url);
//! controller.disconnect();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod logging;
pub mod media_config;
pub mod recovery;
pub mod rtc;
pub mod types;

pub use config::{
    ClientConfig, CodecPreference, ReconnectConfig, SIGNALING_PATH, SignalingUrlBuilder, is_private_host,
    signaling_url,
};
pub use controller::{ReconnectState, SessionController, SessionControllerBuilder, SessionSnapshot};
pub use error::{ClientError, ClientResult};
pub use events::{ClientEvent, EventEmitter, EventPriority, NotificationSeverity, SessionState};
pub use logging::{LoggingConfig, setup_logging};
pub use media_config::{ConfigParam, ConfigValue, MediaConfig, ParamKind};
pub use recovery::{RetryOutcome, retry_at_fixed_interval, with_timeout};
pub use rtc::{
    IceCandidate, IceServer, PeerConnectionState, RtcConfiguration, RtcEvent, RtcPeer, RtcPeerFactory, RtcStats,
    SdpType, SessionDescription, VideoSink,
};
pub use types::{DeviceInfo, StillFormat, StillImage, StillOptions, ZoomAction, ZoomCommand};

// The signaling and SDP layers, for callers that need them directly
pub use rws_sdp_core as sdp;
pub use rws_signaling_core as signaling;

/// Version of the client-core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
