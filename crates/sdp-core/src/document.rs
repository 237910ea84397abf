//! Line-addressed view of a session description
//!
//! An SDP body is a CRLF-separated sequence of `<type>=<value>` lines. Every
//! rewrite in this crate addresses lines by position, so [`SdpDocument`] keeps
//! the lines verbatim and exposes search and edit primitives over them.
//!
//! Edits never mutate in place. Each one returns a fresh document, so an index
//! obtained from one snapshot can never silently point at a different line of
//! the edited result; callers re-run their search on the returned document.
//!
//! ```text
//!   parse ──► SdpDocument ──find_first──► index
//!                  │
//!                  ├─ insert_after(index, line) ──► SdpDocument'
//!                  ├─ replace_at(index, line)   ──► SdpDocument'
//!                  └─ remove_first_matching(..) ──► Option<SdpDocument'>
//! ```

use std::fmt;
use std::ops::Range;

use nom::{
    IResult,
    character::complete::{char, not_line_ending, satisfy},
};

use crate::error::{SdpError, SdpResult};

/// Line separator used when serializing
pub const CRLF: &str = "\r\n";

/// Parse the `<type>=` head of an SDP line, returning the type and value
fn sdp_line(input: &str) -> IResult<&str, (char, &str)> {
    let (input, kind) = satisfy(|c| c.is_ascii_alphabetic())(input)?;
    let (input, _) = char('=')(input)?;
    let (input, value) = not_line_ending(input)?;
    Ok((input, (kind, value)))
}

/// One `m=` block: the media line and every attribute up to the next `m=`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSection {
    /// Media type as written on the `m=` line (`audio`, `video`, ...)
    pub media_type: String,
    /// Line range of the section; `range.start` is the `m=` line itself
    pub range: Range<usize>,
}

impl MediaSection {
    /// Index of the section's `m=` line
    pub fn media_line(&self) -> usize {
        self.range.start
    }
}

/// An ordered, immutable sequence of SDP lines
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SdpDocument {
    lines: Vec<String>,
}

impl SdpDocument {
    /// Parse SDP text into a document
    ///
    /// Lines are split on CRLF; a bare LF is accepted as well. Every line must
    /// follow the `<type>=<value>` grammar except a final empty line, which is
    /// what a trailing CRLF produces and is kept so that serialization
    /// reproduces it.
    ///
    /// # Examples
    ///
    /// ```
    /// use rws_sdp_core::SdpDocument;
    ///
    /// let doc = SdpDocument::parse("v=0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n").unwrap();
    /// assert_eq!(doc.len(), 3);
    /// assert_eq!(doc.serialize(), "v=0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n");
    /// ```
    pub fn parse(text: &str) -> SdpResult<Self> {
        let lines: Vec<String> = text
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
            .collect();

        let last = lines.len().saturating_sub(1);
        for (index, line) in lines.iter().enumerate() {
            if line.is_empty() && index == last {
                continue;
            }
            if sdp_line(line).is_err() {
                return Err(SdpError::MalformedLine { index, line: line.clone() });
            }
        }

        Ok(Self { lines })
    }

    /// Wrap an already split line sequence without validation
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { lines: lines.into_iter().map(Into::into).collect() }
    }

    /// Join the lines back into SDP text
    pub fn serialize(&self) -> String {
        self.lines.join(CRLF)
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn line(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Find the first line starting with `prefix`
    ///
    /// When `substring` is given the line must also contain it, compared
    /// case-insensitively. An absent or empty substring matches any line with
    /// the prefix.
    pub fn find_first(&self, prefix: &str, substring: Option<&str>) -> Option<usize> {
        self.find_first_in(0..self.lines.len(), prefix, substring)
    }

    /// Like [`find_first`](Self::find_first), restricted to `range`
    ///
    /// The range is clamped to the document, so an over-long range is not an
    /// error.
    pub fn find_first_in(
        &self,
        range: Range<usize>,
        prefix: &str,
        substring: Option<&str>,
    ) -> Option<usize> {
        let end = range.end.min(self.lines.len());
        let needle = substring.filter(|s| !s.is_empty()).map(str::to_ascii_lowercase);

        (range.start..end).find(|&index| {
            let line = &self.lines[index];
            line.starts_with(prefix)
                && needle
                    .as_deref()
                    .map_or(true, |needle| line.to_ascii_lowercase().contains(needle))
        })
    }

    /// Return a copy with `line` inserted directly after `index`
    pub fn insert_after(&self, index: usize, line: impl Into<String>) -> SdpResult<Self> {
        self.check_index(index)?;
        let mut lines = self.lines.clone();
        lines.insert(index + 1, line.into());
        Ok(Self { lines })
    }

    /// Return a copy with the line at `index` replaced
    pub fn replace_at(&self, index: usize, line: impl Into<String>) -> SdpResult<Self> {
        self.check_index(index)?;
        let mut lines = self.lines.clone();
        lines[index] = line.into();
        Ok(Self { lines })
    }

    /// Return a copy without the line at `index`
    pub fn remove_at(&self, index: usize) -> SdpResult<Self> {
        self.check_index(index)?;
        let mut lines = self.lines.clone();
        lines.remove(index);
        Ok(Self { lines })
    }

    /// Remove at most one line matching `prefix` and `substring`
    ///
    /// Returns `None` when nothing matched, so callers can loop until the
    /// document stops changing.
    pub fn remove_first_matching(&self, prefix: &str, substring: Option<&str>) -> Option<Self> {
        let index = self.find_first(prefix, substring)?;
        let mut lines = self.lines.clone();
        lines.remove(index);
        Some(Self { lines })
    }

    /// Remove every matching line, returning the result and the removal count
    pub fn remove_all_matching(&self, prefix: &str, substring: Option<&str>) -> (Self, usize) {
        let mut current = self.clone();
        let mut removed = 0;
        while let Some(next) = current.remove_first_matching(prefix, substring) {
            current = next;
            removed += 1;
        }
        (current, removed)
    }

    /// All media sections in document order
    pub fn media_sections(&self) -> Vec<MediaSection> {
        let starts: Vec<usize> = (0..self.lines.len())
            .filter(|&i| self.lines[i].starts_with("m="))
            .collect();

        starts
            .iter()
            .enumerate()
            .map(|(n, &start)| {
                let end = starts.get(n + 1).copied().unwrap_or(self.lines.len());
                let media_type = self.lines[start][2..]
                    .split(' ')
                    .next()
                    .unwrap_or_default()
                    .to_string();
                MediaSection { media_type, range: start..end }
            })
            .collect()
    }

    /// The first media section of the given type
    pub fn media_section(&self, media_type: &str) -> Option<MediaSection> {
        self.media_sections()
            .into_iter()
            .find(|section| section.media_type.eq_ignore_ascii_case(media_type))
    }

    fn check_index(&self, index: usize) -> SdpResult<()> {
        if index < self.lines.len() {
            Ok(())
        } else {
            Err(SdpError::LineOutOfRange { index, len: self.lines.len() })
        }
    }
}

impl fmt::Display for SdpDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}
