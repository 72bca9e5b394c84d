//! Input framing and output line encoding.
//!
//! Stdin arrives as arbitrary byte chunks. In [`InputFraming::Chunk`] mode
//! every chunk, with trailing whitespace trimmed, is one outbound message and
//! nothing is carried across chunk boundaries. [`InputFraming::Line`] mode
//! buffers bytes and emits one message per newline-terminated line instead.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::error::WireError;

/// Upper bound for a buffered partial line in [`InputFraming::Line`] mode
pub const DEFAULT_MAX_LINE_SIZE: usize = 16 * 1024 * 1024;

/// How stdin bytes are cut into outbound messages
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFraming {
    /// Each read chunk is one message
    #[default]
    Chunk,
    /// Each newline-terminated line is one message
    Line,
}

impl FromStr for InputFraming {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chunk" => Ok(Self::Chunk),
            "line" => Ok(Self::Line),
            other => Err(WireError::UnknownFraming(other.to_string())),
        }
    }
}

impl fmt::Display for InputFraming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chunk => f.write_str("chunk"),
            Self::Line => f.write_str("line"),
        }
    }
}

/// Turns raw input chunks into outbound text messages
#[derive(Debug)]
pub struct InputFramer {
    mode: InputFraming,
    partial: BytesMut,
    /// Prefix of `partial` already known to hold no newline
    scanned: usize,
    max_line: usize,
}

impl InputFramer {
    /// Create a framer for the given mode
    pub fn new(mode: InputFraming) -> Self {
        Self::with_max_line(mode, DEFAULT_MAX_LINE_SIZE)
    }

    /// Create a framer with an explicit partial-line limit
    pub fn with_max_line(mode: InputFraming, max_line: usize) -> Self {
        Self {
            mode,
            partial: BytesMut::new(),
            scanned: 0,
            max_line,
        }
    }

    /// Framing mode in use
    pub fn mode(&self) -> InputFraming {
        self.mode
    }

    /// Feed one chunk, appending every complete non-empty message to `out`.
    ///
    /// Messages completed by this chunk are always appended, even when the
    /// trailing partial line overflows and an error is returned.
    pub fn push(&mut self, chunk: &[u8], out: &mut Vec<String>) -> Result<(), WireError> {
        match self.mode {
            InputFraming::Chunk => {
                push_trimmed(chunk, out);
                Ok(())
            }
            InputFraming::Line => {
                self.partial.extend_from_slice(chunk);
                while let Some(offset) = self.partial[self.scanned..]
                    .iter()
                    .position(|&b| b == b'\n')
                {
                    let line = self.partial.split_to(self.scanned + offset + 1);
                    self.scanned = 0;
                    push_trimmed(&line, out);
                }
                self.scanned = self.partial.len();
                if self.partial.len() > self.max_line {
                    let len = self.partial.len();
                    self.partial.clear();
                    self.scanned = 0;
                    return Err(WireError::LineTooLong {
                        len,
                        max: self.max_line,
                    });
                }
                Ok(())
            }
        }
    }

    /// Emit whatever unterminated line is still buffered
    pub fn flush(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        self.scanned = 0;
        let rest = self.partial.split();
        let mut out = Vec::with_capacity(1);
        push_trimmed(&rest, &mut out);
        out.pop()
    }

    /// Discard any buffered partial line
    pub fn reset(&mut self) {
        self.scanned = 0;
        if !self.partial.is_empty() {
            debug!("Discarding {} buffered input bytes", self.partial.len());
            self.partial.clear();
        }
    }
}

fn push_trimmed(raw: &[u8], out: &mut Vec<String>) {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim_end();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

/// Encode one inbound message as an output line: the payload as-is plus `\n`
pub fn encode_output_line(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 1);
    buf.put_slice(payload);
    buf.put_u8(b'\n');
    buf.freeze()
}
