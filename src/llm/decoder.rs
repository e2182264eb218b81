// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Stream framing
//!
//! Splits a raw byte stream into frames (one SSE event, or one NDJSON line)
//! without interpreting payloads. Bytes are buffered raw and only complete
//! lines are decoded as UTF-8, so any chunking of the same stream produces
//! the same frames.

use memchr::memchr;
use std::collections::HashMap;
use thiserror::Error;

use crate::error::ApiError;
use crate::llm::provider::FinishReason;

/// Upper bound on a single buffered line
pub const MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

/// How a vendor frames its stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Server-sent events (`event:` / `data:` lines, blank-line dispatch)
    Sse,
    /// One JSON document per line
    NdJson,
}

/// One framed unit of the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// SSE event name, if any
    pub event: Option<String>,
    /// Payload (SSE data lines joined with `\n`, or the NDJSON line)
    pub data: String,
}

/// Transport-level framing failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("stream line is not valid UTF-8")]
    InvalidUtf8,

    #[error("stream line exceeds {0} bytes")]
    LineTooLong(usize),
}

impl From<FramingError> for ApiError {
    fn from(err: FramingError) -> Self {
        ApiError::Transport(err.to_string())
    }
}

/// Incremental frame reader
#[derive(Debug)]
pub struct FrameReader {
    framing: Framing,
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl FrameReader {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            buffer: Vec::new(),
            event: None,
            data: Vec::new(),
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Bytes waiting for a line terminator
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Feed a chunk and return every frame it completes
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Frame>, FramingError> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut consumed = 0;
        while let Some(pos) = memchr(b'\n', &self.buffer[consumed..]) {
            let end = consumed + pos;
            let line = decode_line(&self.buffer[consumed..end])?;
            consumed = end + 1;
            self.accept_line(&line, &mut frames);
        }
        self.buffer.drain(..consumed);

        if self.buffer.len() > MAX_LINE_BYTES {
            return Err(FramingError::LineTooLong(MAX_LINE_BYTES));
        }
        Ok(frames)
    }

    /// End of stream: flush an unterminated line and any pending event
    pub fn finish(&mut self) -> Result<Vec<Frame>, FramingError> {
        let mut frames = Vec::new();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = decode_line(&rest)?;
            self.accept_line(&line, &mut frames);
        }
        if self.framing == Framing::Sse {
            self.dispatch(&mut frames);
        }
        Ok(frames)
    }

    fn accept_line(&mut self, line: &str, frames: &mut Vec<Frame>) {
        match self.framing {
            Framing::NdJson => {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    frames.push(Frame {
                        event: None,
                        data: trimmed.to_string(),
                    });
                }
            }
            Framing::Sse => {
                if line.is_empty() {
                    self.dispatch(frames);
                    return;
                }
                if line.starts_with(':') {
                    return;
                }
                let (field, value) = match line.split_once(':') {
                    Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                    None => (line, ""),
                };
                match field {
                    "event" => self.event = Some(value.to_string()),
                    "data" => self.data.push(value.to_string()),
                    // id / retry carry nothing we use
                    _ => {}
                }
            }
        }
    }

    fn dispatch(&mut self, frames: &mut Vec<Frame>) {
        let event = self.event.take();
        if self.data.is_empty() {
            return;
        }
        frames.push(Frame {
            event,
            data: std::mem::take(&mut self.data).join("\n"),
        });
    }
}

fn decode_line(raw: &[u8]) -> Result<String, FramingError> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    std::str::from_utf8(raw)
        .map(str::to_string)
        .map_err(|_| FramingError::InvalidUtf8)
}

/// Maps vendor-side tool slots (stream index, block index) to call ids
#[derive(Debug, Default)]
pub struct ToolSlots {
    by_index: HashMap<u64, String>,
    generated: usize,
}

impl ToolSlots {
    pub fn bind(&mut self, index: u64, id: impl Into<String>) {
        self.by_index.insert(index, id.into());
    }

    pub fn id_for(&self, index: u64) -> Option<&str> {
        self.by_index.get(&index).map(String::as_str)
    }

    /// Deterministic id for vendors that don't send one
    pub fn next_id(&mut self, prefix: &str) -> String {
        let id = format!("{}_{}", prefix, self.generated);
        self.generated += 1;
        id
    }
}

/// Per-stream decoding state owned by the session reader
#[derive(Debug)]
pub struct DecoderState {
    pub reader: FrameReader,
    pub tools: ToolSlots,
    /// Finish reason seen but not yet emitted
    pub pending_finish: Option<FinishReason>,
    /// Whether `Finish` has been emitted
    pub finished: bool,
}

impl DecoderState {
    pub fn new(framing: Framing) -> Self {
        Self {
            reader: FrameReader::new(framing),
            tools: ToolSlots::default(),
            pending_finish: None,
            finished: false,
        }
    }

    /// Emit `Finish` at most once per stream
    pub fn take_finish(&mut self, fallback: FinishReason) -> Option<FinishReason> {
        if self.finished {
            return None;
        }
        self.finished = true;
        Some(self.pending_finish.take().unwrap_or(fallback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(event: Option<&str>, data: &str) -> Frame {
        Frame {
            event: event.map(str::to_string),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_sse_data_lines() {
        let mut reader = FrameReader::new(Framing::Sse);
        let frames = reader
            .push(b"data: {\"a\":1}\n\ndata: [DONE]\n\n")
            .unwrap();
        assert_eq!(
            frames,
            vec![frame(None, "{\"a\":1}"), frame(None, "[DONE]")]
        );
    }

    #[test]
    fn test_sse_event_and_data() {
        let mut reader = FrameReader::new(Framing::Sse);
        let frames = reader
            .push(b"event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n")
            .unwrap();
        assert_eq!(
            frames,
            vec![frame(Some("message_stop"), "{\"type\":\"message_stop\"}")]
        );
    }

    #[test]
    fn test_sse_split_mid_line_is_retained() {
        let mut reader = FrameReader::new(Framing::Sse);
        assert!(reader.push(b"data: {\"te").unwrap().is_empty());
        assert!(reader.buffered() > 0);
        assert!(reader.push(b"xt\":\"hi\"}\n").unwrap().is_empty());
        let frames = reader.push(b"\n").unwrap();
        assert_eq!(frames, vec![frame(None, "{\"text\":\"hi\"}")]);
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn test_sse_crlf_and_comments() {
        let mut reader = FrameReader::new(Framing::Sse);
        let frames = reader
            .push(b": OPENROUTER PROCESSING\r\n\r\ndata: x\r\n\r\n")
            .unwrap();
        assert_eq!(frames, vec![frame(None, "x")]);
    }

    #[test]
    fn test_sse_multiline_data_joined() {
        let mut reader = FrameReader::new(Framing::Sse);
        let frames = reader.push(b"data: one\ndata: two\n\n").unwrap();
        assert_eq!(frames, vec![frame(None, "one\ntwo")]);
    }

    #[test]
    fn test_sse_event_without_data_is_dropped() {
        let mut reader = FrameReader::new(Framing::Sse);
        let frames = reader.push(b"event: ping\n\ndata: y\n\n").unwrap();
        assert_eq!(frames, vec![frame(None, "y")]);
    }

    #[test]
    fn test_sse_finish_flushes_unterminated_event() {
        let mut reader = FrameReader::new(Framing::Sse);
        assert!(reader.push(b"data: tail").unwrap().is_empty());
        assert_eq!(reader.finish().unwrap(), vec![frame(None, "tail")]);
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let text = "data: {\"t\":\"héllo\"}\n\n".as_bytes();
        let split = text.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let mut reader = FrameReader::new(Framing::Sse);
        assert!(reader.push(&text[..split]).unwrap().is_empty());
        let frames = reader.push(&text[split..]).unwrap();
        assert_eq!(frames, vec![frame(None, "{\"t\":\"héllo\"}")]);
    }

    #[test]
    fn test_invalid_utf8_is_framing_error() {
        let mut reader = FrameReader::new(Framing::Sse);
        let err = reader.push(b"data: \xff\xfe\n").unwrap_err();
        assert_eq!(err, FramingError::InvalidUtf8);
        let api: ApiError = err.into();
        assert!(matches!(api, ApiError::Transport(_)));
    }

    #[test]
    fn test_ndjson_lines() {
        let mut reader = FrameReader::new(Framing::NdJson);
        let frames = reader.push(b"{\"a\":1}\n\n{\"b\":2}\n{\"c\"").unwrap();
        assert_eq!(frames, vec![frame(None, "{\"a\":1}"), frame(None, "{\"b\":2}")]);
        assert_eq!(reader.finish().unwrap(), vec![frame(None, "{\"c\"")]);
    }

    #[test]
    fn test_tool_slots() {
        let mut slots = ToolSlots::default();
        slots.bind(0, "call_abc");
        assert_eq!(slots.id_for(0), Some("call_abc"));
        assert_eq!(slots.id_for(1), None);
        assert_eq!(slots.next_id("call"), "call_0");
        assert_eq!(slots.next_id("call"), "call_1");
    }

    #[test]
    fn test_take_finish_only_once() {
        let mut state = DecoderState::new(Framing::Sse);
        state.pending_finish = Some(FinishReason::ToolCalls);
        assert_eq!(
            state.take_finish(FinishReason::Stop),
            Some(FinishReason::ToolCalls)
        );
        assert_eq!(state.take_finish(FinishReason::Stop), None);
    }
}
