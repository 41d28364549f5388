//! Splitting of the raw serial byte stream into text lines.

/// Accumulates bytes read from the serial port and yields complete newline-terminated lines.
///
/// Lines are decoded as UTF-8 (invalid sequences are replaced), and surrounding whitespace,
/// including any `\r`, is trimmed. Lines that are empty after trimming are dropped.
#[derive(Debug, Default)]
pub struct LineBuffer {
    /// Bytes of the line currently being received.
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        LineBuffer::default()
    }

    /// Adds `data` to the buffer and returns every line it completed, in order.
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for &byte in data {
            if byte == b'\n' {
                if let Some(line) = decode_line(&self.pending) {
                    lines.push(line);
                }
                self.pending.clear();
            } else {
                self.pending.push(byte);
            }
        }

        lines
    }

    /// Returns whether part of a line has been received but not yet terminated.
    #[cfg(test)]
    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Decodes and trims a raw line, returning `None` if nothing but whitespace remains.
fn decode_line(raw: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();

    if line.is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_lines() {
        let mut lines = LineBuffer::new();

        assert_eq!(vec!["relay 1 on", "relay 2 off"], lines.push(b"relay 1 on\nrelay 2 off\n"));
        assert!(!lines.has_pending());
    }

    #[test]
    fn test_split_across_reads() {
        let mut lines = LineBuffer::new();

        assert!(lines.push(b"rel").is_empty());
        assert!(lines.has_pending());
        assert!(lines.push(b"ay 3").is_empty());
        assert_eq!(vec!["relay 3"], lines.push(b"\nrel"));
        // The start of the next line is kept
        assert!(lines.has_pending());
    }

    #[test]
    fn test_whitespace_is_dropped() {
        let mut lines = LineBuffer::new();

        assert!(lines.push(b"   \n\n\t\r\n").is_empty());
        assert_eq!(vec!["ready"], lines.push(b"  ready \r\n"));
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut lines = LineBuffer::new();

        assert_eq!(vec!["a\u{FFFD}b"], lines.push(b"a\xffb\n"));
    }
}
