//! Line based frame parsing for the chat stream.
//!
//! The backend sends newline delimited lines:
//!
//! ```text
//! data: {"token": "Hi"}
//! data: {"status": "done"}
//! event: end-of-stream
//! ```
//!
//! Network reads are not aligned to lines so an unterminated tail is
//! kept in a buffer and joined with the next decoded fragment.

use serde::Deserialize;

const DATA_PREFIX: &str = "data: ";
const END_OF_STREAM: &str = "event: end-of-stream";

#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Token(String),
    StatusDone,
    EndOfStream,
    Unknown,
}

impl Frame {
    /// True for frames that end the current bot turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Frame::StatusDone | Frame::EndOfStream)
    }
}

// Payloads carry either a `token` or a `status`. Anything else still
// has to deserialize so it can be ignored instead of treated as
// malformed.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Payload {
    Token { token: String },
    Status { status: String },
    Other(serde_json::Value),
}

/// Classifies a single complete line.
pub fn parse_line(line: &str) -> Frame {
    if line.starts_with(END_OF_STREAM) {
        return Frame::EndOfStream;
    }

    let Some(data) = line.strip_prefix(DATA_PREFIX) else {
        return Frame::Unknown;
    };

    match serde_json::from_str::<Payload>(data) {
        Ok(Payload::Token { token }) => Frame::Token(token),
        Ok(Payload::Status { status }) if status == "done" => Frame::StatusDone,
        Ok(_) => Frame::Unknown,
        Err(e) => {
            tracing::debug!("Dropping malformed frame {:?}: {}", data, e);
            Frame::Unknown
        }
    }
}

#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: String,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds the next decoded fragment and returns the frames for
    /// every line it completed, in order.
    pub fn push(&mut self, text: &str) -> Vec<Frame> {
        self.buffer.push_str(text);

        let mut frames = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = self.buffer[consumed..].find('\n') {
            let end = consumed + offset;
            let line = self.buffer[consumed..end].trim_end_matches('\r');
            frames.push(parse_line(line));
            consumed = end + 1;
        }
        self.buffer.drain(..consumed);

        frames
    }

    /// Flushes the last line when the body ends without a trailing
    /// newline.
    pub fn finish(&mut self) -> Option<Frame> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buffer);
        Some(parse_line(line.trim_end_matches('\r')))
    }

    /// The unterminated tail waiting for more input.
    pub fn pending(&self) -> &str {
        &self.buffer
    }
}
