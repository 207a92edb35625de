//! Terminal control sequence filtering.
//!
//! Network device shells emit cursor positioning, scroll-region and colour
//! sequences even when nobody asked for a terminal. Everything downstream
//! (prompt counting, prompt extraction, transcripts) only ever sees text that
//! went through this filter.

use std::borrow::Cow;
use std::sync::LazyLock;

use bytes::BytesMut;
use regex::bytes::Regex;

/// CSI sequences, charset selects, BEL, and C0 controls other than TAB/LF/CR.
static CONTROL_SEQUENCES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?-u)\x1b\[[0-9;?]*[a-zA-Z]|\x1b[()][AB012]|\x07|[\x00-\x08\x0B\x0C\x0E-\x1F]")
        .expect("control sequence pattern is valid")
});

const ESC: u8 = 0x1b;

/// A CSI parameter run longer than this is treated as garbage, not held back.
const MAX_CSI_PARAMS: usize = 32;

/// Remove control sequences from raw bytes.
///
/// The result contains no ESC byte and no C0 control other than `\t`, `\n`
/// and `\r`, so filtering it again is a no-op.
pub fn strip_control_sequences(data: &[u8]) -> Cow<'_, [u8]> {
    CONTROL_SEQUENCES.replace_all(data, &b""[..])
}

/// Remove control sequences from text.
pub fn filter_text(text: &str) -> Cow<'_, str> {
    match strip_control_sequences(text.as_bytes()) {
        Cow::Borrowed(_) => Cow::Borrowed(text),
        // Only ASCII bytes were removed, so the remainder is still valid UTF-8.
        Cow::Owned(bytes) => Cow::Owned(String::from_utf8_lossy(&bytes).into_owned()),
    }
}

/// Streaming control-sequence filter for channel reads.
///
/// Reads arrive in arbitrary chunks, so an escape sequence or a multi-byte
/// UTF-8 character may be split across two of them. The incomplete tail is
/// held back until the next [`push`](Self::push).
#[derive(Debug, Default)]
pub struct StreamFilter {
    pending: BytesMut,
}

impl StreamFilter {
    /// Create an empty stream filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw chunk and return the filtered text that is complete so far.
    pub fn push(&mut self, data: &[u8]) -> String {
        self.pending.extend_from_slice(data);
        let ready = complete_prefix_len(&self.pending);
        let chunk = self.pending.split_to(ready);
        decode(&chunk)
    }

    /// Flush whatever is still held back.
    pub fn finish(&mut self) -> String {
        let chunk = self.pending.split();
        decode(&chunk)
    }

    /// Number of bytes currently held back.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn decode(chunk: &[u8]) -> String {
    let cleaned = strip_control_sequences(chunk);
    String::from_utf8_lossy(&cleaned).into_owned()
}

/// Length of the prefix of `buf` that can be filtered without splitting an
/// escape sequence or a UTF-8 character.
fn complete_prefix_len(buf: &[u8]) -> usize {
    let mut cut = buf.len();

    if let Some(esc) = memchr::memrchr(ESC, buf) {
        if escape_incomplete(&buf[esc + 1..]) {
            cut = esc;
        }
    }

    cut - incomplete_utf8_tail(&buf[..cut])
}

/// Whether the bytes following an ESC could still grow into a filtered sequence.
fn escape_incomplete(rest: &[u8]) -> bool {
    match rest.first() {
        None => true,
        Some(b'[') => {
            let params = &rest[1..];
            params.len() <= MAX_CSI_PARAMS
                && params
                    .iter()
                    .all(|b| b.is_ascii_digit() || *b == b';' || *b == b'?')
        }
        Some(b'(') | Some(b')') => rest.len() == 1,
        Some(_) => false,
    }
}

/// Number of trailing bytes that form the start of an unfinished UTF-8 character.
fn incomplete_utf8_tail(buf: &[u8]) -> usize {
    let start = buf.len().saturating_sub(3);
    for i in (start..buf.len()).rev() {
        let b = buf[i];
        if b & 0xC0 == 0x80 {
            // continuation byte, keep looking for the lead byte
            continue;
        }
        let needed = match b {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => return 0,
        };
        let have = buf.len() - i;
        return if have < needed { have } else { 0 };
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_filtered_bytes(text: &str) -> bool {
        text.bytes()
            .any(|b| b == ESC || b == 0x07 || (b < 0x20 && b != b'\t' && b != b'\n' && b != b'\r'))
    }

    #[test]
    fn test_csi_removed() {
        let raw = "\x1b[1;24r\x1b[24;1Hrouter#\x1b[2K\x1b[?25h";
        assert_eq!(filter_text(raw), "router#");
    }

    #[test]
    fn test_colour_codes_removed() {
        assert_eq!(filter_text("\x1b[32mGreen text\x1b[0m"), "Green text");
    }

    #[test]
    fn test_charset_select_and_bell_removed() {
        assert_eq!(filter_text("\x1b(Bfoo\x1b)0bar\x07"), "foobar");
    }

    #[test]
    fn test_c0_controls_removed_but_whitespace_kept() {
        let raw = "a\x00b\x08c\td\ne\rf\x0bg\x0ch\x1f";
        assert_eq!(filter_text(raw), "abc\td\ne\rfgh");
    }

    #[test]
    fn test_clean_text_is_borrowed() {
        let text = "show version\nR1#";
        assert!(matches!(filter_text(text), Cow::Borrowed(_)));
    }

    #[test]
    fn test_idempotent() {
        let samples = [
            "\x1b\x1b[31mred\x1b[0m",
            "\x1b[\x1b[1mx",
            "plain\r\n",
            "\x1b(\x1b(Bz",
            "\x07\x1b[?1049h\x1b[H\x1b[2Jswitch>",
        ];
        for raw in samples {
            let once = filter_text(raw).into_owned();
            let twice = filter_text(&once).into_owned();
            assert_eq!(once, twice, "not idempotent for {:?}", raw);
            assert!(!has_filtered_bytes(&once), "leftover control in {:?}", once);
        }
    }

    #[test]
    fn test_stream_split_escape_sequence() {
        let mut filter = StreamFilter::new();
        assert_eq!(filter.push(b"output\x1b[2"), "output");
        assert_eq!(filter.pending_len(), 3);
        assert_eq!(filter.push(b"4;1HR1#"), "R1#");
        assert_eq!(filter.pending_len(), 0);
    }

    #[test]
    fn test_stream_split_charset_select() {
        let mut filter = StreamFilter::new();
        assert_eq!(filter.push(b"abc\x1b("), "abc");
        assert_eq!(filter.push(b"Bdef"), "def");
    }

    #[test]
    fn test_stream_split_utf8() {
        let bytes = "caf\u{e9}#".as_bytes();
        let mut filter = StreamFilter::new();
        assert_eq!(filter.push(&bytes[..4]), "caf");
        assert_eq!(filter.push(&bytes[4..]), "\u{e9}#");
    }

    #[test]
    fn test_stream_invalid_utf8_is_lossy() {
        let mut filter = StreamFilter::new();
        assert_eq!(filter.push(b"a\xffb"), "a\u{fffd}b");
    }

    #[test]
    fn test_stream_finish_flushes_held_bytes() {
        let mut filter = StreamFilter::new();
        assert_eq!(filter.push(b"x\x1b["), "x");
        // A dangling ESC is a C0 control and is dropped, the '[' survives.
        assert_eq!(filter.finish(), "[");
    }
}
