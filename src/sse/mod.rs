//! Server-Sent-Events consumer
//!
//! Turns the relay's raw byte stream back into typed upstream events:
//! bytes are decoded incrementally, partial lines are buffered across
//! chunks, and every complete `data: <json>` line is decoded into a
//! [`StreamEvent`]. A malformed line is logged and skipped, it never ends
//! the stream.

use futures::stream::{Stream, StreamExt};
use serde::Deserialize;

/// Prefix of every SSE data record
pub const DATA_PREFIX: &str = "data: ";

/// One event emitted by the upstream conversational API
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A fragment of the answer text
    Message {
        #[serde(default)]
        answer: Option<String>,
        #[serde(default)]
        conversation_id: Option<String>,
    },

    /// A new upstream workflow run; carries the assigned conversation id
    WorkflowStarted {
        #[serde(default)]
        conversation_id: Option<String>,
    },

    /// End of the turn. The stream itself may still carry trailing records.
    WorkflowFinished,

    /// Upstream failure reported in-band
    Error {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },

    /// Any event tag this client does not act on
    #[serde(other)]
    Other,
}

impl StreamEvent {
    /// Human readable text of an `error` event
    pub fn error_text(&self) -> Option<String> {
        match self {
            StreamEvent::Error { error, message } => Some(
                error
                    .clone()
                    .or_else(|| message.clone())
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "Unknown error".to_string()),
            ),
            _ => None,
        }
    }
}

/// A `data:` line whose payload is not a valid event
#[derive(Debug, thiserror::Error)]
#[error("Malformed SSE data line '{line}': {source}")]
pub struct StreamParseError {
    pub line: String,
    #[source]
    pub source: serde_json::Error,
}

/// Parse a single SSE line.
///
/// Lines that are not `data:` records (comments, `event:` fields, blank
/// separators) yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<StreamEvent>, StreamParseError> {
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Ok(None);
    };

    serde_json::from_str(payload)
        .map(Some)
        .map_err(|source| StreamParseError {
            line: line.to_string(),
            source,
        })
}

/// Incremental byte-to-line decoder
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    buffer: String,
    utf8_buffer: Vec<u8>,
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completed, without terminators
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.push_bytes(bytes);
        self.drain_lines()
    }

    /// Text received after the last newline
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Consume the decoder, returning the incomplete trailing record if any
    pub fn finish(self) -> Option<String> {
        let mut rest = self.buffer;
        if !self.utf8_buffer.is_empty() {
            rest.push_str(&String::from_utf8_lossy(&self.utf8_buffer));
        }
        if rest.is_empty() {
            None
        } else {
            Some(rest)
        }
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        self.utf8_buffer.extend_from_slice(bytes);
        loop {
            match std::str::from_utf8(&self.utf8_buffer) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    self.utf8_buffer.clear();
                    return;
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    self.buffer
                        .push_str(&String::from_utf8_lossy(&self.utf8_buffer[..valid_up_to]));
                    match err.error_len() {
                        // Invalid sequence: replace it and keep going
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            self.utf8_buffer.drain(..valid_up_to + len);
                        }
                        // Incomplete sequence at the end: wait for the next chunk
                        None => {
                            self.utf8_buffer.drain(..valid_up_to);
                            return;
                        }
                    }
                }
            }
        }
    }

    fn drain_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let mut line: String = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }
}

/// Turn a byte stream into a stream of upstream events.
///
/// Events are yielded in wire order. A transport error is yielded once and
/// ends the stream. Whatever partial record is buffered when the byte
/// stream ends is dropped.
pub fn event_stream<S, B, E>(bytes: S) -> impl Stream<Item = Result<StreamEvent, E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    async_stream::stream! {
        let mut decoder = SseLineDecoder::new();
        futures::pin_mut!(bytes);

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    yield Err(err);
                    break;
                }
            };

            for line in decoder.push(chunk.as_ref()) {
                match parse_line(&line) {
                    Ok(Some(event)) => yield Ok(event),
                    Ok(None) => {}
                    Err(err) => tracing::warn!("Skipping SSE record: {}", err),
                }
            }
        }

        if let Some(rest) = decoder.finish() {
            tracing::debug!("Dropping incomplete trailing SSE record ({} bytes)", rest.len());
        }
    }
}
