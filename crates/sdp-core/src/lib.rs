//! # SDP rewriting for the rws client
//!
//! This crate rewrites WebRTC session descriptions so the client can force a
//! codec and bitrate policy before a description is applied. It works on the
//! SDP text line by line and preserves everything it does not touch.
//!
//! - [`document`] - [`SdpDocument`], the line-addressed document with search
//!   and snapshot edits
//! - [`media`] - [`MediaDescriptor`], the `m=` line view
//! - [`codec`] - rtpmap/fmtp views and the per-section [`CodecTable`]
//! - [`policy`] - [`prefer_codec`], [`set_bitrate_and_format`], [`drop_codec`]
//!   and the [`CodecPreferencePolicy`] bundle
//!
//! ## Quick Start
//!
//! ```
//! use rws_sdp_core::{prefer_codec, set_bitrate_and_format};
//!
//! let offer = "v=0\r\n\
//!              m=video 9 UDP/TLS/RTP/SAVPF 96 97 98\r\n\
//!              a=rtpmap:96 VP8/90000\r\n\
//!              a=rtpmap:98 H264/90000\r\n";
//!
//! let offer = prefer_codec(offer, "video", "H264/90000");
//! assert!(offer.contains("m=video 9 UDP/TLS/RTP/SAVPF 98 96 97"));
//!
//! let answer = set_bitrate_and_format(&offer, "H264/90000", 4000, 2000);
//! assert!(answer.contains("x-google-min-bitrate=2000; x-google-max-bitrate=2000"));
//! ```

pub mod codec;
pub mod document;
pub mod error;
pub mod media;
pub mod policy;

pub use codec::{CodecBinding, CodecTable, FmtpParam, FmtpRecord, MatchMode, fmtp_for, payload_type_for};
pub use document::{MediaSection, SdpDocument};
pub use error::{SdpError, SdpResult};
pub use media::MediaDescriptor;
pub use policy::{
    CodecPreferencePolicy, drop_codec, drop_codec_with, prefer_codec, prefer_codec_with,
    set_bitrate_and_format, set_bitrate_and_format_with, set_codec_param,
};

/// Version of the sdp-core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
