//! Pattern matching over receive buffers
//!
//! Expect statements search the unconsumed portion of a device's receive
//! buffer for a compiled pattern. A successful match reports the offset
//! immediately past the matched bytes (the interpreter consumes through
//! that offset and never re-examines the bytes) plus the text captured
//! by each group, which setstatus/setplugname statements read.

use regex::bytes::Regex;

/// Result of a successful pattern match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSpan {
    /// Offset immediately past the last byte of the match
    pub end: usize,
    /// Captured group texts, lossily decoded; index 0 is the whole match
    pub captures: Vec<Option<String>>,
}

impl MatchSpan {
    /// Captured text for a group, if the group participated in the match
    pub fn group(&self, index: usize) -> Option<&str> {
        self.captures.get(index)?.as_deref()
    }
}

/// Search `buf` for the first occurrence of `re`
///
/// Returns the offset just past the match and the captured groups, or
/// `None` if the buffer does not (yet) contain a match. A zero-length
/// match is a valid match. Never reads past `buf`.
pub fn find_match(re: &Regex, buf: &[u8]) -> Option<MatchSpan> {
    let caps = re.captures(buf)?;
    let end = caps.get(0).map(|m| m.end()).unwrap_or(0);
    let captures = (0..caps.len())
        .map(|i| {
            caps.get(i)
                .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
        })
        .collect();
    Some(MatchSpan { end, captures })
}
