// src/protocol/decoder.rs

//! Incremental newline splitter for the program's stdout.
//!
//! Chunks from the pipe can end anywhere, including in the middle of a
//! multi-byte UTF-8 sequence, so the decoder buffers raw bytes and only
//! decodes a line once its `\n` has arrived.

use serde_json::Value;
use tracing::trace;

use crate::protocol::message::ProtocolMessage;

/// One complete line from stdout.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedLine {
    Message(ProtocolMessage),
    /// A line that is not a protocol message, kept verbatim (including its
    /// trailing newline, when it had one).
    Text(String),
}

#[derive(Debug, Default)]
pub struct LineDecoder {
    pending: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<DecodedLine> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset + 1;
            if let Some(line) = decode_line(&self.pending[start..end]) {
                lines.push(line);
            }
            start = end;
        }
        self.pending.drain(..start);

        lines
    }

    /// Flush a trailing line that never got its newline (stream ended).
    pub fn finish(&mut self) -> Option<DecodedLine> {
        let rest = std::mem::take(&mut self.pending);
        decode_line(&rest)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

fn decode_line(raw: &[u8]) -> Option<DecodedLine> {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => match ProtocolMessage::from_value(&value) {
            Some(message) => Some(DecodedLine::Message(message)),
            None => Some(DecodedLine::Text(text.into_owned())),
        },
        Err(err) => {
            trace!(error = %err, "non-protocol stdout line");
            Some(DecodedLine::Text(text.into_owned()))
        }
    }
}
