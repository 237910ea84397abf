//! Property and scenario tests for the codec preference rewrites
//!
//! Invariants checked for generated offers:
//! - parse/serialize round-trips
//! - prefer_codec is idempotent and never adds or loses a payload
//! - set_bitrate_and_format never lets the minimum exceed the maximum
//! - drop_codec leaves no line bound to a dropped payload, however the
//!   payload token is written

use std::collections::BTreeSet;

use proptest::prelude::*;

use rws_sdp_core::{
    MediaDescriptor, SdpDocument, drop_codec, fmtp_for, payload_type_for, prefer_codec,
    set_bitrate_and_format,
};

const CODECS: [(u8, &str); 7] = [
    (96, "VP8/90000"),
    (97, "rtx/90000"),
    (98, "H264/90000"),
    (100, "VP9/90000"),
    (102, "AV1/90000"),
    (125, "ulpfec/90000"),
    (127, "red/90000"),
];

fn build_offer(codecs: &[(u8, &str)]) -> String {
    let payloads: Vec<String> = codecs.iter().map(|(pt, _)| pt.to_string()).collect();
    let mut lines = vec![
        "v=0".to_string(),
        "o=- 1 2 IN IP4 127.0.0.1".to_string(),
        "s=-".to_string(),
        "t=0 0".to_string(),
        "m=audio 9 UDP/TLS/RTP/SAVPF 111".to_string(),
        "a=rtpmap:111 opus/48000/2".to_string(),
        format!("m=video 9 UDP/TLS/RTP/SAVPF {}", payloads.join(" ")),
        "c=IN IP4 0.0.0.0".to_string(),
    ];
    for (pt, key) in codecs {
        lines.push(format!("a=rtpmap:{pt} {key}"));
        lines.push(format!("a=rtcp-fb:{pt} nack"));
    }
    lines.push(String::new());
    lines.join("\r\n")
}

/// Offer whose payload tokens are zero-padded where `padded` says so, with
/// every codec bound twice (primary and `+1` duplicate) and rtcp-fb/fmtp lines
fn build_padded_offer(codecs: &[(u8, &str)], padded: &[bool]) -> String {
    let token = |pt: u8, pad: bool| if pad { format!("0{pt}") } else { pt.to_string() };
    let mut bound = Vec::new();
    for (i, (pt, key)) in codecs.iter().enumerate() {
        let pad = padded.get(i).copied().unwrap_or(false);
        bound.push((token(*pt, pad), *key));
        bound.push((token(pt + 100, !pad), *key));
    }
    let payloads: Vec<&str> = bound.iter().map(|(t, _)| t.as_str()).collect();
    let mut lines = vec![
        "v=0".to_string(),
        format!("m=video 9 UDP/TLS/RTP/SAVPF {}", payloads.join(" ")),
    ];
    for (t, key) in &bound {
        lines.push(format!("a=rtpmap:{t} {key}"));
        lines.push(format!("a=rtcp-fb:{t} nack"));
        lines.push(format!("a=rtcp-fb:{t} nack pli"));
        lines.push(format!("a=fmtp:{t} x=1"));
    }
    lines.push("a=rtcp-fb:* transport-cc".to_string());
    lines.push(String::new());
    lines.join("\r\n")
}

fn video_payloads(sdp: &str) -> Vec<String> {
    let doc = SdpDocument::parse(sdp).unwrap();
    let section = doc.media_section("video").unwrap();
    MediaDescriptor::parse(doc.line(section.media_line()).unwrap()).unwrap().payloads
}

fn codec_subset() -> impl Strategy<Value = Vec<(u8, &'static str)>> {
    prop::sample::subsequence(CODECS.to_vec(), 1..=CODECS.len()).prop_shuffle()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// serialize(parse(text)) parses back to the same lines
    #[test]
    fn prop_round_trip(codecs in codec_subset()) {
        let text = build_offer(&codecs);
        let doc = SdpDocument::parse(&text).unwrap();
        let reparsed = SdpDocument::parse(&doc.serialize()).unwrap();
        prop_assert_eq!(reparsed, doc);
    }

    /// Preferring twice gives the same result as preferring once
    #[test]
    fn prop_prefer_codec_idempotent(codecs in codec_subset(), target in prop::sample::select(CODECS.to_vec())) {
        let text = build_offer(&codecs);
        let once = prefer_codec(&text, "video", target.1);
        let twice = prefer_codec(&once, "video", target.1);
        prop_assert_eq!(once, twice);
    }

    /// The payload set is unchanged and the target, when present, is first
    #[test]
    fn prop_prefer_codec_keeps_payload_set(codecs in codec_subset(), target in prop::sample::select(CODECS.to_vec())) {
        let text = build_offer(&codecs);
        let out = prefer_codec(&text, "video", target.1);

        let before: BTreeSet<String> = video_payloads(&text).into_iter().collect();
        let after_list = video_payloads(&out);
        let after: BTreeSet<String> = after_list.iter().cloned().collect();
        prop_assert_eq!(&before, &after);
        prop_assert_eq!(after_list.len(), before.len());

        if codecs.contains(&target) {
            prop_assert_eq!(after_list[0].clone(), target.0.to_string());
        } else {
            prop_assert_eq!(out, text);
        }
    }

    /// Every line bound to a dropped codec goes, and nothing else does
    #[test]
    fn prop_drop_codec_removes_all_bindings(
        codecs in prop::sample::subsequence(CODECS[..5].to_vec(), 1..=5),
        padded in prop::collection::vec(any::<bool>(), 5),
        target in prop::sample::select(CODECS[..5].to_vec()),
    ) {
        let text = build_padded_offer(&codecs, &padded);
        let out = drop_codec(&text, "video", target.1);
        let doc = SdpDocument::parse(&out).unwrap();

        prop_assert_eq!(payload_type_for(&doc, "video", target.1), None);
        let dropped = [target.0, target.0 + 100];
        for line in doc.lines() {
            for attribute in ["a=rtpmap:", "a=rtcp-fb:", "a=fmtp:"] {
                if let Some(rest) = line.strip_prefix(attribute) {
                    let token = rest.split(' ').next().unwrap();
                    if let Ok(pt) = token.parse::<u8>() {
                        prop_assert!(!dropped.contains(&pt), "left behind: {}", line);
                    }
                }
            }
        }
        for token in video_payloads(&out) {
            prop_assert!(!dropped.contains(&token.parse::<u8>().unwrap()));
        }

        let kept = codecs.iter().filter(|c| **c != target).count();
        prop_assert_eq!(video_payloads(&out).len(), kept * 2);
        prop_assert!(out.contains("a=rtcp-fb:* transport-cc"));
    }

    /// A minimum above the maximum is clamped to the maximum
    #[test]
    fn prop_clamp_law(min in 0u32..20_000, max in 0u32..20_000) {
        let text = build_offer(&CODECS);
        let out = set_bitrate_and_format(&text, "H264/90000", min, max);
        let record = fmtp_for(&SdpDocument::parse(&out).unwrap(), 98).unwrap();

        let applied_min: u32 = record.get("x-google-min-bitrate").unwrap().parse().unwrap();
        let applied_max: u32 = record.get("x-google-max-bitrate").unwrap().parse().unwrap();
        prop_assert_eq!(applied_max, max);
        prop_assert_eq!(applied_min, min.min(max));
    }
}

/// H.264 listed last is moved to the front
#[test]
fn test_prefer_h264_scenario() {
    let sdp = "m=video 9 UDP/TLS/RTP/SAVPF 96 97 98\r\n\
               a=rtpmap:96 VP8/90000\r\n\
               a=rtpmap:97 rtx/90000\r\n\
               a=rtpmap:98 H264/90000";
    let out = prefer_codec(sdp, "video", "H264/90000");
    assert_eq!(out.lines().next(), Some("m=video 9 UDP/TLS/RTP/SAVPF 98 96 97"));
}

/// Bitrate bounds land on the H.264 fmtp line with min clamped to max
#[test]
fn test_bitrate_scenario() {
    let out = set_bitrate_and_format(&build_offer(&CODECS), "H264/90000", 4000, 2000);
    assert!(out.contains(
        "a=fmtp:98 x-google-min-bitrate=2000; x-google-max-bitrate=2000; \
         level-asymmetry-allowed=1; packetization-mode=1; profile-level-id=42e01f\r\n"
    ));
}

/// Applying the bitrate twice only rewrites values
#[test]
fn test_bitrate_reapplied_keeps_single_fmtp() {
    let once = set_bitrate_and_format(&build_offer(&CODECS), "H264/90000", 100, 900);
    let twice = set_bitrate_and_format(&once, "H264/90000", 200, 800);
    assert_eq!(twice.matches("a=fmtp:98 ").count(), 1);
    assert!(twice.contains("x-google-min-bitrate=200; x-google-max-bitrate=800;"));
}

/// An empty codec key leaves the offer byte-identical
#[test]
fn test_empty_codec_is_no_preference() {
    let sdp = build_offer(&CODECS);
    assert_eq!(prefer_codec(&sdp, "video", ""), sdp);
}

/// Dropping a codec never touches other media sections
#[test]
fn test_drop_codec_scoped_to_section() {
    let sdp = build_offer(&CODECS);
    let out = drop_codec(&sdp, "video", "VP9/90000");
    let doc = SdpDocument::parse(&out).unwrap();
    assert_eq!(payload_type_for(&doc, "video", "VP9/90000"), None);
    assert_eq!(payload_type_for(&doc, "audio", "opus/48000"), Some(111));
    assert!(!video_payloads(&out).contains(&"100".to_string()));
}

/// Zero-padded payload tokens are matched as written
#[test]
fn test_drop_codec_padded_payload() {
    let sdp = "v=0\r\n\
               m=video 9 RTP/AVP 096 98\r\n\
               a=rtpmap:096 VP8/90000\r\n\
               a=rtcp-fb:096 nack\r\n\
               a=rtpmap:98 H264/90000\r\n";
    let out = drop_codec(sdp, "video", "VP8/90000");
    assert_eq!(out, "v=0\r\nm=video 9 RTP/AVP 98\r\na=rtpmap:98 H264/90000\r\n");
}

/// A padded payload is preferred and gets its fmtp line under the same token
#[test]
fn test_padded_payload_prefer_and_bitrate() {
    let sdp = "m=video 9 RTP/AVP 96 098\r\n\
               a=rtpmap:96 VP8/90000\r\n\
               a=rtpmap:098 H264/90000";
    let preferred = prefer_codec(sdp, "video", "H264/90000");
    assert_eq!(preferred.lines().next(), Some("m=video 9 RTP/AVP 098 96"));

    let out = set_bitrate_and_format(&preferred, "H264/90000", 300, 900);
    assert!(out.contains("a=rtpmap:098 H264/90000\r\na=fmtp:098 x-google-min-bitrate=300;"));
}

/// A payload listed as 96 on the m= line but bound as 096 is still dropped
#[test]
fn test_drop_codec_mixed_token_forms() {
    let sdp = "m=video 9 RTP/AVP 96 98\r\n\
               a=rtpmap:096 VP8/90000\r\n\
               a=fmtp:96 max-fr=30\r\n\
               a=rtpmap:98 H264/90000";
    let out = drop_codec(sdp, "video", "VP8");
    assert_eq!(out, "m=video 9 RTP/AVP 98\r\na=rtpmap:98 H264/90000");
}
