//! Newline framer for the Meshtastic debug console.
//!
//! The serial port hands out arbitrary chunks; this module reassembles them
//! into text lines. Bytes that are not valid UTF-8 are dropped, `\r\n` and
//! surrounding whitespace are trimmed, and blank lines are skipped. A run of
//! more than [`MAX_LINE_LEN`] bytes without a newline (binary protobuf traffic,
//! a wrong baud rate) is discarded up to the next newline so the buffer cannot
//! grow without bound.
use bytes::{Buf, BytesMut};

/// Maximum allowed line length before the partial line is discarded.
pub const MAX_LINE_LEN: usize = 4096;

pub struct LineFramer {
    buf: BytesMut,
    /// Set while skipping the tail of an oversize line.
    discarding: bool,
}

impl LineFramer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
            discarding: false,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete, non-blank line, if one is buffered.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
                if self.buf.len() > MAX_LINE_LEN {
                    log::debug!(
                        "Discarding {} bytes without newline (binary data or wrong baud rate?)",
                        self.buf.len()
                    );
                    self.buf.clear();
                    self.discarding = true;
                }
                return None;
            };
            let raw = self.buf.split_to(pos + 1);
            if std::mem::take(&mut self.discarding) {
                continue;
            }
            let line = decode_line(&raw);
            if !line.is_empty() {
                return Some(line);
            }
        }
    }

    /// Flush whatever is left as a final line (end of a replay file).
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() || std::mem::take(&mut self.discarding) {
            self.buf.clear();
            return None;
        }
        let raw = self.buf.split_to(self.buf.len());
        let line = decode_line(&raw);
        (!line.is_empty()).then_some(line)
    }

    pub fn buffered(&self) -> usize {
        self.buf.remaining()
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-effort UTF-8 decode with invalid bytes dropped and whitespace trimmed.
pub fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .chars()
        .filter(|&c| c != char::REPLACEMENT_CHARACTER)
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_lines_across_chunks() {
        let mut f = LineFramer::new();
        f.push(b"Update DB no");
        assert_eq!(f.next_line(), None);
        f.push(b"de 0x1a\r\nUncompressed device_callsign 'A'\n\r\n\n");
        assert_eq!(f.next_line().as_deref(), Some("Update DB node 0x1a"));
        assert_eq!(
            f.next_line().as_deref(),
            Some("Uncompressed device_callsign 'A'")
        );
        assert_eq!(f.next_line(), None);
        assert_eq!(f.buffered(), 0);
    }

    #[test]
    fn drops_invalid_utf8_bytes() {
        let mut f = LineFramer::new();
        f.push(b"lat=\xff\xfe12\n");
        assert_eq!(f.next_line().as_deref(), Some("lat=12"));
    }

    #[test]
    fn discards_oversize_partial_line() {
        let mut f = LineFramer::new();
        f.push(&vec![b'x'; MAX_LINE_LEN + 1]);
        assert_eq!(f.next_line(), None);
        f.push(b"tail of junk\nnext line\n");
        assert_eq!(f.next_line().as_deref(), Some("next line"));
    }

    #[test]
    fn finish_returns_unterminated_tail() {
        let mut f = LineFramer::new();
        f.push(b"last line");
        assert_eq!(f.next_line(), None);
        assert_eq!(f.finish().as_deref(), Some("last line"));
        assert_eq!(f.finish(), None);
    }
}
