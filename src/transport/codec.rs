//! Line framing for the CLI's stdout and stderr.
//!
//! Wraps `LinesCodec` so an over-long line surfaces as an item instead of a
//! stream error, and reassembles JSON values the CLI split across lines.

use std::io;

use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::error::ClaudeError;

/// One unit read from a line-oriented pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawLine {
    /// A complete line without its terminator
    Line(String),
    /// A line longer than the limit; its bytes were discarded
    Oversized,
    /// A line that was not valid UTF-8
    Invalid(String),
}

/// `LinesCodec` that keeps going after a bad line.
pub struct LineCodec {
    inner: LinesCodec,
}

impl LineCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_length),
        }
    }

    fn map(result: Result<Option<String>, LinesCodecError>) -> io::Result<Option<RawLine>> {
        match result {
            Ok(line) => Ok(line.map(RawLine::Line)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(RawLine::Oversized)),
            Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
                Ok(Some(RawLine::Invalid(e.to_string())))
            }
            Err(LinesCodecError::Io(e)) => Err(e),
        }
    }
}

impl Decoder for LineCodec {
    type Item = RawLine;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Self::map(self.inner.decode(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Self::map(self.inner.decode_eof(src))
    }
}

/// Accumulates lines until they form one JSON value.
///
/// Only an unexpected end of input keeps the buffer open; any other syntax
/// error is reported immediately and the buffer is reset.
pub struct JsonAccumulator {
    buffer: String,
    max_size: usize,
}

impl JsonAccumulator {
    pub fn new(max_size: usize) -> Self {
        Self {
            buffer: String::new(),
            max_size,
        }
    }

    /// Feed one line. `None` means more input is needed.
    pub fn push(&mut self, line: &str) -> Option<Result<serde_json::Value, ClaudeError>> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        self.buffer.push_str(line);
        if self.buffer.len() > self.max_size {
            self.buffer.clear();
            return Some(Err(ClaudeError::BufferOverflow {
                limit: self.max_size,
            }));
        }

        match serde_json::from_str::<serde_json::Value>(&self.buffer) {
            Ok(value) => {
                self.buffer.clear();
                Some(Ok(value))
            }
            Err(e) if e.is_eof() => None,
            Err(e) => {
                self.buffer.clear();
                Some(Err(ClaudeError::JsonDecode(e)))
            }
        }
    }

    /// Drop buffered input, e.g. after the current line was discarded.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Report a value left incomplete at end of stream.
    pub fn finish(&mut self) -> Option<ClaudeError> {
        if self.buffer.is_empty() {
            return None;
        }
        let pending = std::mem::take(&mut self.buffer);
        Some(match serde_json::from_str::<serde_json::Value>(&pending) {
            Err(e) => ClaudeError::JsonDecode(e),
            Ok(_) => ClaudeError::json_decode("Incomplete JSON at end of stream"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_oversized_line_then_recovery() {
        let mut codec = LineCodec::new(8);
        let mut buf = BytesMut::from(&b"0123456789abcdef\n{\"a\":1}\n"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(RawLine::Oversized));
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(RawLine::Line("{\"a\":1}".to_string()))
        );
    }

    #[test]
    fn test_final_line_without_newline() {
        let mut codec = LineCodec::new(64);
        let mut buf = BytesMut::from(&b"{\"type\":\"x\"}"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(
            codec.decode_eof(&mut buf).unwrap(),
            Some(RawLine::Line("{\"type\":\"x\"}".to_string()))
        );
    }

    #[test]
    fn test_accumulates_split_value() {
        let mut acc = JsonAccumulator::new(1024);
        assert!(acc.push("{\"type\":\"user\",").is_none());
        let value = acc.push("\"n\":1}").unwrap().unwrap();
        assert_eq!(value, json!({"type": "user", "n": 1}));
    }

    #[test]
    fn test_syntax_error_is_reported_and_cleared() {
        let mut acc = JsonAccumulator::new(1024);
        assert!(matches!(
            acc.push("{not json}"),
            Some(Err(ClaudeError::JsonDecode(_)))
        ));
        assert_eq!(acc.push("{\"ok\":true}").unwrap().unwrap(), json!({"ok": true}));
    }

    #[test]
    fn test_accumulated_size_is_capped() {
        let mut acc = JsonAccumulator::new(16);
        assert!(acc.push("{\"a\":\"0123").is_none());
        assert!(matches!(
            acc.push("456789abcdef\"}"),
            Some(Err(ClaudeError::BufferOverflow { limit: 16 }))
        ));
        assert!(acc.finish().is_none());
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let mut acc = JsonAccumulator::new(16);
        assert!(acc.push("   ").is_none());
        assert!(acc.finish().is_none());
    }
}
