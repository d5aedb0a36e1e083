//! Incremental decoder for OpenAI-style Server-Sent-Events chat streams
//!
//! Each relevant line looks like `data: {"choices":[{"delta":{"content":"..."}}]}`
//! and the stream ends with `data: [DONE]`. Frames that fail to parse are
//! skipped rather than aborting the stream.

use crate::{MurmurError, Result};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tracing::debug;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// A decoded event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// Incremental text
    Delta(String),
    /// Terminal sentinel
    Done,
}

/// Longest line the decoder buffers before discarding it
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// Line-buffering decoder.
///
/// Bytes are buffered until a full line is available, so multi-byte
/// characters split across network reads decode correctly. A line longer
/// than [`MAX_LINE_BYTES`] is dropped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    // Bytes of `buffer` already known to contain no newline
    scanned: usize,
    overflowed: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return every frame completed by them
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            if self.overflowed {
                self.overflowed = false;
            } else {
                let line = String::from_utf8_lossy(&self.buffer[start..end]);
                if let Some(frame) = parse_line(&line) {
                    frames.push(frame);
                }
            }
            start = end + 1;
            self.scanned = start;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        if self.buffer.len() > MAX_LINE_BYTES {
            debug!("Dropping SSE line longer than {} bytes", MAX_LINE_BYTES);
            self.buffer.clear();
            self.scanned = 0;
            self.overflowed = true;
        }
        frames
    }

    /// Decode whatever is left once the byte stream has closed
    pub fn finish(&mut self) -> Option<SseFrame> {
        self.scanned = 0;
        if std::mem::take(&mut self.overflowed) || self.buffer.is_empty() {
            self.buffer.clear();
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&String::from_utf8_lossy(&rest))
    }
}

/// Parse a single line; `None` for blank, non-data, malformed or empty frames
pub fn parse_line(line: &str) -> Option<SseFrame> {
    let line = line.trim_end_matches('\r');
    let payload = line.strip_prefix(DATA_PREFIX)?.trim();

    if payload == DONE_SENTINEL {
        return Some(SseFrame::Done);
    }

    match serde_json::from_str::<StreamChunk>(payload) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
            .map(SseFrame::Delta),
        Err(e) => {
            debug!("Skipping malformed SSE frame: {} - data: {}", e, payload);
            None
        }
    }
}

/// Turn a byte stream into a stream of text deltas.
///
/// Ends at the `[DONE]` sentinel or when the byte stream closes. A transport
/// error is yielded as `MurmurError::StreamError` and ends the stream.
pub fn delta_stream<S, B, E>(bytes: S) -> impl Stream<Item = Result<String>>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    async_stream::try_stream! {
        futures::pin_mut!(bytes);
        let mut decoder = SseDecoder::new();
        let mut done = false;

        'read: while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|e| MurmurError::StreamError(e.to_string()))?;
            for frame in decoder.feed(chunk.as_ref()) {
                match frame {
                    SseFrame::Delta(text) => yield text,
                    SseFrame::Done => {
                        done = true;
                        break 'read;
                    }
                }
            }
        }

        if !done {
            if let Some(SseFrame::Delta(text)) = decoder.finish() {
                yield text;
            }
        }
    }
}
