//! Codec preference rewriting
//!
//! These are the transforms applied to offers and answers before they reach
//! the RTC engine. Each one is total over well-formed input: when the target
//! media section, codec or payload is missing the input comes back unchanged.
//! Text that does not parse as SDP is also returned unchanged, with a debug
//! log, so that a bad rewrite never blocks negotiation.
//!
//! | Operation | Effect |
//! |---|---|
//! | [`prefer_codec`] | moves the codec's payload to the front of the `m=` line |
//! | [`set_bitrate_and_format`] | upserts bitrate and H.264 format parameters |
//! | [`drop_codec`] | removes the codec from the section entirely |

use tracing::debug;

use crate::codec::{CodecBinding, CodecTable, FmtpRecord, MatchMode};
use crate::document::SdpDocument;
use crate::error::SdpResult;
use crate::media::MediaDescriptor;

/// Media section targeted by [`set_bitrate_and_format`]
pub const BITRATE_MEDIA_TYPE: &str = "video";

/// Fixed format parameters written after the bitrate bounds
pub const H264_FORMAT_PARAMS: [(&str, &str); 3] = [
    ("level-asymmetry-allowed", "1"),
    ("packetization-mode", "1"),
    ("profile-level-id", "42e01f"),
];

/// Whether a payload token names `binding`'s payload (`096` and `96` agree)
fn same_payload(token: &str, binding: &CodecBinding) -> bool {
    token == binding.token || token.parse::<u8>().is_ok_and(|p| p == binding.payload)
}

/// Payload token of an `a=<attribute>:<pt> ...` line
fn attribute_payload<'a>(line: &'a str, attribute: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(attribute)?;
    Some(rest.split_once(' ').map_or(rest, |(token, _)| token))
}

fn rewrite_text(
    sdp: &str,
    operation: &'static str,
    rewrite: impl FnOnce(&SdpDocument) -> SdpResult<Option<SdpDocument>>,
) -> String {
    let doc = match SdpDocument::parse(sdp) {
        Ok(doc) => doc,
        Err(e) => {
            debug!(operation, error = %e, "Leaving unparseable SDP untouched");
            return sdp.to_string();
        }
    };

    match rewrite(&doc) {
        Ok(Some(rewritten)) => rewritten.serialize(),
        Ok(None) => sdp.to_string(),
        Err(e) => {
            debug!(operation, error = %e, "SDP rewrite failed, keeping input");
            sdp.to_string()
        }
    }
}

/// Move `codec_key`'s payload to the front of the `media_type` line
///
/// The remaining payloads keep their relative order. An empty `codec_key`
/// means no preference.
///
/// ```
/// use rws_sdp_core::prefer_codec;
///
/// let sdp = "m=video 9 UDP/TLS/RTP/SAVPF 96 97 98\r\n\
///            a=rtpmap:96 VP8/90000\r\n\
///            a=rtpmap:98 H264/90000";
/// let out = prefer_codec(sdp, "video", "H264/90000");
/// assert!(out.starts_with("m=video 9 UDP/TLS/RTP/SAVPF 98 96 97\r\n"));
/// ```
pub fn prefer_codec(sdp: &str, media_type: &str, codec_key: &str) -> String {
    prefer_codec_with(sdp, media_type, codec_key, MatchMode::Substring)
}

pub fn prefer_codec_with(sdp: &str, media_type: &str, codec_key: &str, mode: MatchMode) -> String {
    if codec_key.is_empty() {
        debug!(media_type, "No codec preference");
        return sdp.to_string();
    }
    rewrite_text(sdp, "prefer_codec", |doc| prefer_codec_in(doc, media_type, codec_key, mode))
}

/// Document form of [`prefer_codec`]; `None` means nothing changed
pub fn prefer_codec_in(
    doc: &SdpDocument,
    media_type: &str,
    codec_key: &str,
    mode: MatchMode,
) -> SdpResult<Option<SdpDocument>> {
    let Some(table) = CodecTable::for_media(doc, media_type) else {
        debug!(media_type, "No media line, codec preference skipped");
        return Ok(None);
    };
    let Some((_, binding)) = table.binding_for(codec_key, mode) else {
        debug!(media_type, codec = codec_key, "Codec not offered, preference skipped");
        return Ok(None);
    };

    let index = table.section().media_line();
    let Some(line) = doc.line(index) else { return Ok(None) };
    let media = MediaDescriptor::parse(line)?;

    let (matched, rest): (Vec<String>, Vec<String>) =
        media.payloads.iter().cloned().partition(|p| same_payload(p, binding));
    let Some(first) = matched.into_iter().next() else {
        debug!(media_type, payload = %binding.token, "Payload bound but not listed on m= line");
        return Ok(None);
    };

    let mut payloads = Vec::with_capacity(media.payloads.len());
    payloads.push(first);
    payloads.extend(rest);

    let rewritten = media.with_payloads(payloads);
    debug!(media_type, codec = codec_key, line = %rewritten, "Preferred codec");
    doc.replace_at(index, rewritten.to_line()).map(Some)
}

/// Apply bitrate bounds and H.264 format parameters to `codec_key`
///
/// A `min_kbps` above `max_kbps` is clamped down to `max_kbps`; the maximum is
/// never raised. Parameters are upserted in this order:
/// `x-google-min-bitrate`, `x-google-max-bitrate`, then
/// [`H264_FORMAT_PARAMS`]. When the payload has no fmtp line, one is inserted
/// right after its rtpmap line.
pub fn set_bitrate_and_format(sdp: &str, codec_key: &str, min_kbps: u32, max_kbps: u32) -> String {
    set_bitrate_and_format_with(sdp, codec_key, min_kbps, max_kbps, MatchMode::Substring)
}

pub fn set_bitrate_and_format_with(
    sdp: &str,
    codec_key: &str,
    min_kbps: u32,
    max_kbps: u32,
    mode: MatchMode,
) -> String {
    rewrite_text(sdp, "set_bitrate_and_format", |doc| {
        set_bitrate_and_format_in(doc, codec_key, min_kbps, max_kbps, mode)
    })
}

pub fn set_bitrate_and_format_in(
    doc: &SdpDocument,
    codec_key: &str,
    min_kbps: u32,
    max_kbps: u32,
    mode: MatchMode,
) -> SdpResult<Option<SdpDocument>> {
    let min_kbps = if min_kbps > max_kbps {
        debug!(min_kbps, max_kbps, "Clamping minimum bitrate to maximum");
        max_kbps
    } else {
        min_kbps
    };

    let mut params = vec![
        ("x-google-min-bitrate", min_kbps.to_string()),
        ("x-google-max-bitrate", max_kbps.to_string()),
    ];
    params.extend(H264_FORMAT_PARAMS.iter().map(|(k, v)| (*k, v.to_string())));

    upsert_fmtp_in(doc, BITRATE_MEDIA_TYPE, codec_key, &params, mode)
}

/// Upsert a single fmtp parameter for `codec_key` in `media_type`
pub fn set_codec_param(
    sdp: &str,
    media_type: &str,
    codec_key: &str,
    key: &str,
    value: &str,
) -> String {
    rewrite_text(sdp, "set_codec_param", |doc| {
        upsert_fmtp_in(doc, media_type, codec_key, &[(key, value.to_string())], MatchMode::Substring)
    })
}

/// Upsert several fmtp parameters in order
///
/// Existing keys keep their position; new keys are appended in the order
/// given.
pub fn upsert_fmtp_in(
    doc: &SdpDocument,
    media_type: &str,
    codec_key: &str,
    params: &[(&str, String)],
    mode: MatchMode,
) -> SdpResult<Option<SdpDocument>> {
    let Some(table) = CodecTable::for_media(doc, media_type) else {
        debug!(media_type, "No media line, fmtp update skipped");
        return Ok(None);
    };
    let Some((rtpmap_index, binding)) = table.binding_for(codec_key, mode) else {
        debug!(media_type, codec = codec_key, "Codec not offered, fmtp update skipped");
        return Ok(None);
    };

    let (existing, mut record) = match table.fmtp_entry(binding.payload) {
        Some((index, record)) => (Some(index), record.clone()),
        None => (None, FmtpRecord::for_binding(binding)),
    };
    for (key, value) in params {
        record.set(key, value.clone());
    }

    let line = record.to_line();
    debug!(media_type, payload = binding.payload, fmtp = %line, "Updated format parameters");
    match existing {
        Some(index) => doc.replace_at(index, line).map(Some),
        None => doc.insert_after(rtpmap_index, line).map(Some),
    }
}

/// Remove `codec_key` from `media_type` altogether
///
/// Every payload bound to the codec is dropped from the `m=` line together
/// with its `a=rtpmap`, `a=rtcp-fb` and `a=fmtp` lines. Unlike
/// [`prefer_codec`] this is destructive and is never applied implicitly.
pub fn drop_codec(sdp: &str, media_type: &str, codec_key: &str) -> String {
    drop_codec_with(sdp, media_type, codec_key, MatchMode::Substring)
}

pub fn drop_codec_with(sdp: &str, media_type: &str, codec_key: &str, mode: MatchMode) -> String {
    if codec_key.is_empty() {
        return sdp.to_string();
    }
    rewrite_text(sdp, "drop_codec", |doc| drop_codec_in(doc, media_type, codec_key, mode))
}

pub fn drop_codec_in(
    doc: &SdpDocument,
    media_type: &str,
    codec_key: &str,
    mode: MatchMode,
) -> SdpResult<Option<SdpDocument>> {
    let mut current = doc.clone();
    let mut changed = false;

    loop {
        let Some(table) = CodecTable::for_media(&current, media_type) else { break };
        let Some((_, binding)) = table.binding_for(codec_key, mode) else { break };
        let binding = binding.clone();
        let section = table.section().clone();

        let media_index = section.media_line();
        let media = match current.line(media_index) {
            Some(line) => MediaDescriptor::parse(line)?,
            None => break,
        };
        let remaining = media.payloads.iter().filter(|p| !same_payload(p, &binding)).cloned().collect();
        current = current.replace_at(media_index, media.with_payloads(remaining).to_line())?;

        // attribute lines of the section bound to the payload, last first so
        // earlier indices stay valid
        let doomed: Vec<usize> = section
            .range
            .clone()
            .filter(|&index| {
                current.line(index).is_some_and(|line| {
                    ["a=rtpmap:", "a=rtcp-fb:", "a=fmtp:"].iter().any(|attribute| {
                        attribute_payload(line, attribute).is_some_and(|token| same_payload(token, &binding))
                    })
                })
            })
            .collect();
        if doomed.is_empty() {
            debug!(media_type, payload = %binding.token, "Codec binding not removable, stopping");
            break;
        }
        for index in doomed.into_iter().rev() {
            current = current.remove_at(index)?;
        }

        debug!(media_type, codec = codec_key, payload = %binding.token, "Dropped codec payload");
        changed = true;
    }

    Ok(changed.then_some(current))
}

/// Codec choices applied to every negotiated description
///
/// `rewrite_offer` runs on the remote offer before it is applied;
/// `rewrite_answer` runs on the local answer before it is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecPreferencePolicy {
    pub video_codec: String,
    pub audio_codec: String,
    pub min_kbps: Option<u32>,
    pub max_kbps: Option<u32>,
    pub match_mode: MatchMode,
}

impl Default for CodecPreferencePolicy {
    fn default() -> Self {
        Self {
            video_codec: "H264/90000".to_string(),
            audio_codec: String::new(),
            min_kbps: None,
            max_kbps: None,
            match_mode: MatchMode::Substring,
        }
    }
}

impl CodecPreferencePolicy {
    pub fn with_video_codec(mut self, codec: impl Into<String>) -> Self {
        self.video_codec = codec.into();
        self
    }

    pub fn with_audio_codec(mut self, codec: impl Into<String>) -> Self {
        self.audio_codec = codec.into();
        self
    }

    pub fn with_bitrate(mut self, min_kbps: u32, max_kbps: u32) -> Self {
        self.min_kbps = Some(min_kbps);
        self.max_kbps = Some(max_kbps);
        self
    }

    pub fn with_match_mode(mut self, mode: MatchMode) -> Self {
        self.match_mode = mode;
        self
    }

    /// Reorder the offer's audio and video payloads
    pub fn rewrite_offer(&self, sdp: &str) -> String {
        let sdp = prefer_codec_with(sdp, "audio", &self.audio_codec, self.match_mode);
        prefer_codec_with(&sdp, "video", &self.video_codec, self.match_mode)
    }

    /// Add bitrate and format constraints to the answer, when both bounds are set
    pub fn rewrite_answer(&self, sdp: &str) -> String {
        match (self.min_kbps, self.max_kbps) {
            (Some(min), Some(max)) if !self.video_codec.is_empty() => {
                set_bitrate_and_format_with(sdp, &self.video_codec, min, max, self.match_mode)
            }
            _ => sdp.to_string(),
        }
    }
}
