//! Codec bindings and format parameters
//!
//! [`CodecBinding`] is the view of an `a=rtpmap` line and [`FmtpRecord`] the
//! view of an `a=fmtp` line. [`CodecTable`] indexes both for a single media
//! section so that payload lookups never cross into another `m=` block.
//!
//! Codec keys are written `name/clockRate` (`H264/90000`, `opus/48000`). By
//! default a key matches any binding whose `name/rate` contains it,
//! case-insensitively, which is how callers have always passed bare keys.
//! [`MatchMode::Exact`] is available when that is too loose (a key of `VP8`
//! would otherwise also match a hypothetical `VP80`).

use nom::{
    IResult,
    bytes::complete::{tag, take_while1},
    character::complete::{char, digit1, space1},
    combinator::{eof, map_res, opt},
    sequence::preceded,
};

use crate::document::{MediaSection, SdpDocument};
use crate::error::{SdpError, SdpResult};

/// How a codec key is compared against `name/rate`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    /// Case-insensitive containment
    #[default]
    Substring,
    /// Case-insensitive equality
    Exact,
}

impl MatchMode {
    pub fn matches(self, binding_key: &str, codec_key: &str) -> bool {
        if codec_key.is_empty() {
            return false;
        }
        let binding_key = binding_key.to_ascii_lowercase();
        let codec_key = codec_key.to_ascii_lowercase();
        match self {
            MatchMode::Substring => binding_key.contains(&codec_key),
            MatchMode::Exact => binding_key == codec_key,
        }
    }
}

/// `a=rtpmap:<payload> <name>/<rate>[/<channels>]`
///
/// `token` is the payload exactly as written (`096` stays `096`) and is
/// reused for any line written on the payload's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecBinding {
    pub payload: u8,
    pub token: String,
    pub name: String,
    pub clock_rate: u32,
    pub channels: Option<u8>,
}

fn rtpmap(input: &str) -> IResult<&str, CodecBinding> {
    let (input, token) = preceded(tag("a=rtpmap:"), digit1)(input)?;
    let (_, payload) = map_res(digit1, str::parse::<u8>)(token)?;
    let (input, _) = char(' ')(input)?;
    let (input, name) = take_while1(|c: char| c.is_ascii_alphanumeric() || c == '-')(input)?;
    let (input, clock_rate) = preceded(char('/'), map_res(digit1, str::parse::<u32>))(input)?;
    let (input, channels) = opt(preceded(char('/'), map_res(digit1, str::parse::<u8>)))(input)?;
    // nothing may follow but trailing whitespace
    let (input, _) = opt(space1)(input)?;
    let (input, _) = eof(input)?;

    Ok((
        input,
        CodecBinding { payload, token: token.to_string(), name: name.to_string(), clock_rate, channels },
    ))
}

impl CodecBinding {
    pub fn parse(line: &str) -> SdpResult<Self> {
        rtpmap(line)
            .map(|(_, binding)| binding)
            .map_err(|_| SdpError::invalid_attribute("rtpmap", line))
    }

    /// Lookup key, `name/rate`
    pub fn key(&self) -> String {
        format!("{}/{}", self.name, self.clock_rate)
    }
}

/// One `key[=value]` entry of an fmtp line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FmtpParam {
    pub key: String,
    pub value: Option<String>,
}

/// `a=fmtp:<payload> k=v; k=v`
///
/// Parameters keep first-seen order. [`set`](Self::set) replaces an existing
/// value in place and appends unknown keys at the end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FmtpRecord {
    pub payload: u8,
    /// Payload as written on the line
    pub token: String,
    params: Vec<FmtpParam>,
}

impl FmtpRecord {
    pub fn new(payload: u8) -> Self {
        Self { payload, token: payload.to_string(), params: Vec::new() }
    }

    /// Empty record for the payload of `binding`, keeping its token
    pub fn for_binding(binding: &CodecBinding) -> Self {
        Self { payload: binding.payload, token: binding.token.clone(), params: Vec::new() }
    }

    pub fn parse(line: &str) -> SdpResult<Self> {
        let invalid = || SdpError::invalid_attribute("fmtp", line);

        let rest = line.strip_prefix("a=fmtp:").ok_or_else(invalid)?;
        let (token, params) = rest.split_once(' ').unwrap_or((rest, ""));
        if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let payload = token.parse::<u8>().map_err(|_| invalid())?;

        let params = params
            .split(';')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| match p.split_once('=') {
                Some((key, value)) => FmtpParam { key: key.to_string(), value: Some(value.to_string()) },
                None => FmtpParam { key: p.to_string(), value: None },
            })
            .collect();

        Ok(Self { payload, token: token.to_string(), params })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.key == key)
            .and_then(|p| p.value.as_deref())
    }

    pub fn params(&self) -> &[FmtpParam] {
        &self.params
    }

    /// Upsert a parameter without disturbing the position of existing ones
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = Some(value.into());
        match self.params.iter_mut().find(|p| p.key == key) {
            Some(param) => param.value = value,
            None => self.params.push(FmtpParam { key: key.to_string(), value }),
        }
    }

    pub fn to_line(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| match &p.value {
                Some(value) => format!("{}={}", p.key, value),
                None => p.key.clone(),
            })
            .collect();
        format!("a=fmtp:{} {}", self.token, params.join("; "))
    }
}

/// Codec index of a single media section
#[derive(Debug, Clone)]
pub struct CodecTable {
    section: MediaSection,
    bindings: Vec<(usize, CodecBinding)>,
    fmtps: Vec<(usize, FmtpRecord)>,
}

impl CodecTable {
    /// Index the first media section of `media_type`
    pub fn for_media(doc: &SdpDocument, media_type: &str) -> Option<Self> {
        doc.media_section(media_type).map(|section| Self::for_section(doc, section))
    }

    /// Index an explicit section
    ///
    /// Lines that fail the rtpmap or fmtp grammar are skipped rather than
    /// failing the whole table.
    pub fn for_section(doc: &SdpDocument, section: MediaSection) -> Self {
        let mut bindings = Vec::new();
        let mut fmtps = Vec::new();

        for index in section.range.clone() {
            let Some(line) = doc.line(index) else { break };
            if line.starts_with("a=rtpmap:") {
                if let Ok(binding) = CodecBinding::parse(line) {
                    bindings.push((index, binding));
                }
            } else if line.starts_with("a=fmtp:") {
                if let Ok(record) = FmtpRecord::parse(line) {
                    fmtps.push((index, record));
                }
            }
        }

        Self { section, bindings, fmtps }
    }

    pub fn section(&self) -> &MediaSection {
        &self.section
    }

    pub fn bindings(&self) -> impl Iterator<Item = &CodecBinding> {
        self.bindings.iter().map(|(_, b)| b)
    }

    /// First payload whose `name/rate` matches `codec_key`
    ///
    /// An empty key means "no preference" and never matches.
    pub fn payload_type_for(&self, codec_key: &str, mode: MatchMode) -> Option<u8> {
        self.binding_for(codec_key, mode).map(|(_, b)| b.payload)
    }

    /// Line index and binding of the first match for `codec_key`
    pub fn binding_for(&self, codec_key: &str, mode: MatchMode) -> Option<(usize, &CodecBinding)> {
        self.bindings
            .iter()
            .find(|(_, b)| mode.matches(&b.key(), codec_key))
            .map(|(index, b)| (*index, b))
    }

    pub fn fmtp_for(&self, payload: u8) -> Option<&FmtpRecord> {
        self.fmtp_entry(payload).map(|(_, record)| record)
    }

    /// Line index and record of the fmtp line for `payload`
    pub fn fmtp_entry(&self, payload: u8) -> Option<(usize, &FmtpRecord)> {
        self.fmtps
            .iter()
            .find(|(_, r)| r.payload == payload)
            .map(|(index, r)| (*index, r))
    }
}

/// Payload bound to `codec_key` within the first `media_type` section
pub fn payload_type_for(doc: &SdpDocument, media_type: &str, codec_key: &str) -> Option<u8> {
    CodecTable::for_media(doc, media_type)?.payload_type_for(codec_key, MatchMode::Substring)
}

/// First fmtp record for `payload` anywhere in the document
pub fn fmtp_for(doc: &SdpDocument, payload: u8) -> Option<FmtpRecord> {
    doc.lines()
        .iter()
        .filter(|line| line.starts_with("a=fmtp:"))
        .filter_map(|line| FmtpRecord::parse(line).ok())
        .find(|record| record.payload == payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rtpmap() {
        let binding = CodecBinding::parse("a=rtpmap:98 H264/90000").unwrap();
        assert_eq!(binding.payload, 98);
        assert_eq!(binding.name, "H264");
        assert_eq!(binding.clock_rate, 90000);
        assert_eq!(binding.channels, None);
        assert_eq!(binding.key(), "H264/90000");

        let opus = CodecBinding::parse("a=rtpmap:111 opus/48000/2").unwrap();
        assert_eq!(opus.channels, Some(2));
        assert_eq!(opus.key(), "opus/48000");
    }

    #[test]
    fn test_parse_rtpmap_rejects_bad_grammar() {
        assert!(CodecBinding::parse("a=rtpmap:x H264/90000").is_err());
        assert!(CodecBinding::parse("a=rtpmap:98 H264").is_err());
        assert!(CodecBinding::parse("a=rtpmap:98 H.264/90000").is_err());
        assert!(CodecBinding::parse("a=rtpmap:300 H264/90000").is_err());
        assert!(CodecBinding::parse("a=rtpmap:98 H264/90000junk").is_err());
        assert!(CodecBinding::parse("a=rtpmap:111 opus/48000/2x").is_err());
        assert!(CodecBinding::parse("a=rtpmap:98 H264/90000 ").is_ok());
    }

    #[test]
    fn test_payload_token_is_kept_verbatim() {
        let binding = CodecBinding::parse("a=rtpmap:096 VP8/90000").unwrap();
        assert_eq!(binding.payload, 96);
        assert_eq!(binding.token, "096");

        let mut record = FmtpRecord::parse("a=fmtp:096 max-fr=30").unwrap();
        assert_eq!(record.payload, 96);
        record.set("max-fs", "3600");
        assert_eq!(record.to_line(), "a=fmtp:096 max-fr=30; max-fs=3600");
        assert_eq!(FmtpRecord::for_binding(&binding).to_line(), "a=fmtp:096 ");
    }

    #[test]
    fn test_parse_fmtp_keeps_order_and_flags() {
        let record = FmtpRecord::parse(
            "a=fmtp:98 level-asymmetry-allowed=1;packetization-mode=1; profile-level-id=42e01f",
        )
        .unwrap();
        assert_eq!(record.payload, 98);
        let keys: Vec<&str> = record.params().iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["level-asymmetry-allowed", "packetization-mode", "profile-level-id"]);
        assert_eq!(record.get("profile-level-id"), Some("42e01f"));

        let flagged = FmtpRecord::parse("a=fmtp:101 0-15").unwrap();
        assert_eq!(flagged.params()[0].value, None);
        assert_eq!(flagged.to_line(), "a=fmtp:101 0-15");
    }

    #[test]
    fn test_fmtp_set_in_place() {
        let mut record = FmtpRecord::parse("a=fmtp:98 a=1; b=2").unwrap();
        record.set("a", "9");
        record.set("c", "3");
        assert_eq!(record.to_line(), "a=fmtp:98 a=9; b=2; c=3");
    }

    #[test]
    fn test_match_mode() {
        assert!(MatchMode::Substring.matches("H264/90000", "h264"));
        assert!(MatchMode::Substring.matches("VP80/90000", "VP8"));
        assert!(!MatchMode::Exact.matches("VP80/90000", "VP8/90000"));
        assert!(MatchMode::Exact.matches("vp8/90000", "VP8/90000"));
        assert!(!MatchMode::Substring.matches("H264/90000", ""));
    }

    #[test]
    fn test_codec_table_is_scoped_to_section() {
        let doc = SdpDocument::parse(
            "v=0\r\n\
             m=audio 9 RTP/AVP 111 96\r\n\
             a=rtpmap:111 opus/48000/2\r\n\
             a=rtpmap:96 telephone-event/8000\r\n\
             m=video 9 RTP/AVP 96 98\r\n\
             a=rtpmap:96 VP8/90000\r\n\
             a=rtpmap:98 H264/90000\r\n\
             a=fmtp:98 packetization-mode=1",
        )
        .unwrap();

        assert_eq!(payload_type_for(&doc, "video", "H264/90000"), Some(98));
        assert_eq!(payload_type_for(&doc, "audio", "H264/90000"), None);
        assert_eq!(payload_type_for(&doc, "video", "opus"), None);
        assert_eq!(payload_type_for(&doc, "video", ""), None);

        let video = CodecTable::for_media(&doc, "video").unwrap();
        assert_eq!(video.fmtp_for(98).and_then(|r| r.get("packetization-mode")), Some("1"));
        assert!(video.fmtp_for(96).is_none());
        assert_eq!(fmtp_for(&doc, 98).map(|r| r.payload), Some(98));
    }
}
