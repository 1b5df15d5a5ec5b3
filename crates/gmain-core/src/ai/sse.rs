//! SSE stream decoder for the Messages API.
//!
//! Consumes line-oriented `data: <json>` frames from a byte stream, yields
//! typed [`StreamChunk`]s, and accumulates the canonical
//! [`MessagesResponse`]. Tool input arrives as `partial_json` deltas into a
//! per-index side buffer that is parsed only at `content_block_stop`; when
//! the buffer is empty the block's initial `input` field stands.

use std::collections::{HashMap, HashSet};
use std::pin::Pin;

use anyhow::{anyhow, Result};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tracing::warn;

use crate::ai::types::{ContentBlock, MessagesResponse, WireEvent};

/// A decoded unit of the stream, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// Text delta appended to the block at `index`.
    Text { index: usize, text: String },
    /// A `tool_use` block opened at `index`.
    ToolUseStart {
        index: usize,
        id: String,
        name: String,
    },
    /// Partial JSON appended to the tool-input side buffer at `index`.
    ToolUseDelta { index: usize, partial_json: String },
    /// The block at `index` is finalized.
    ContentBlockStop { index: usize },
    /// The message finished; `stop_reason` is available on the response.
    MessageStop,
    /// An upstream `error` event or an unparseable frame. The reader stays
    /// usable; the caller decides whether to abort.
    Error { message: String },
}

enum LineOutcome {
    Chunk(StreamChunk),
    Nothing,
    Done,
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Single-consumer reader over one streaming response.
pub struct StreamReader {
    stream: ByteStream,
    buffer: Vec<u8>,
    response: MessagesResponse,
    tool_inputs: HashMap<usize, String>,
    open_blocks: HashSet<usize>,
    done: bool,
}

impl StreamReader {
    pub fn new(stream: impl Stream<Item = Result<Bytes>> + Send + 'static) -> Self {
        Self {
            stream: Box::pin(stream),
            buffer: Vec::new(),
            response: MessagesResponse::default(),
            tool_inputs: HashMap::new(),
            open_blocks: HashSet::new(),
            done: false,
        }
    }

    /// Next chunk, or `None` once the stream has terminated (`[DONE]` or
    /// end-of-input). End-of-input while a content block is still open is a
    /// hard error.
    pub async fn next(&mut self) -> Result<Option<StreamChunk>> {
        if self.done {
            return Ok(None);
        }

        loop {
            while let Some(line) = self.take_line() {
                match self.handle_line(&line)? {
                    LineOutcome::Chunk(chunk) => return Ok(Some(chunk)),
                    LineOutcome::Done => return Ok(None),
                    LineOutcome::Nothing => {}
                }
            }

            match self.stream.next().await {
                Some(Ok(bytes)) => self.buffer.extend_from_slice(&bytes),
                Some(Err(err)) => {
                    self.done = true;
                    return Err(err.context("failed to read stream"));
                }
                None => {
                    self.done = true;
                    if let Some(index) = self.open_blocks.iter().min() {
                        return Err(anyhow!(
                            "stream ended with content block {index} still open"
                        ));
                    }
                    return Ok(None);
                }
            }
        }
    }

    /// The accumulated response. Fully canonical only after termination.
    pub fn response(&self) -> &MessagesResponse {
        &self.response
    }

    pub fn into_response(self) -> MessagesResponse {
        self.response
    }

    fn take_line(&mut self) -> Option<String> {
        let pos = self.buffer.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.buffer.drain(..=pos).collect();
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }

    fn handle_line(&mut self, line: &str) -> Result<LineOutcome> {
        // Blank separators and `event:` lines carry no payload.
        let Some(payload) = line.strip_prefix("data:").map(str::trim_start) else {
            return Ok(LineOutcome::Nothing);
        };

        if payload == "[DONE]" {
            self.done = true;
            if let Some(index) = self.open_blocks.iter().min() {
                return Err(anyhow!(
                    "stream ended with content block {index} still open"
                ));
            }
            return Ok(LineOutcome::Done);
        }

        let event: WireEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "unparseable stream frame");
                return Ok(LineOutcome::Chunk(StreamChunk::Error {
                    message: format!("malformed stream payload: {payload}"),
                }));
            }
        };

        Ok(self.handle_event(event))
    }

    fn handle_event(&mut self, event: WireEvent) -> LineOutcome {
        match event.kind.as_str() {
            "message_start" => {
                if let Some(message) = event.message {
                    self.response.id = message.id;
                    self.response.model = message.model;
                    self.response.role = message.role;
                    self.response.usage = message.usage;
                }
                LineOutcome::Nothing
            }

            "content_block_start" => {
                let index = event.index;
                let Some(block) = event.content_block else {
                    return LineOutcome::Nothing;
                };

                while self.response.content.len() <= index {
                    self.response.content.push(ContentBlock::text(""));
                }
                self.open_blocks.insert(index);

                let chunk = match &block {
                    ContentBlock::ToolUse { id, name, .. } => Some(StreamChunk::ToolUseStart {
                        index,
                        id: id.clone(),
                        name: name.clone(),
                    }),
                    _ => None,
                };
                self.response.content[index] = block;

                match chunk {
                    Some(chunk) => LineOutcome::Chunk(chunk),
                    None => LineOutcome::Nothing,
                }
            }

            "content_block_delta" => {
                let index = event.index;
                let Some(delta) = event.delta else {
                    return LineOutcome::Nothing;
                };

                if let Some(text) = delta.text.filter(|t| !t.is_empty()) {
                    if let Some(ContentBlock::Text { text: slot }) =
                        self.response.content.get_mut(index)
                    {
                        slot.push_str(&text);
                    }
                    return LineOutcome::Chunk(StreamChunk::Text { index, text });
                }

                if let Some(partial) = delta.partial_json.filter(|p| !p.is_empty()) {
                    self.tool_inputs.entry(index).or_default().push_str(&partial);
                    return LineOutcome::Chunk(StreamChunk::ToolUseDelta {
                        index,
                        partial_json: partial,
                    });
                }

                LineOutcome::Nothing
            }

            "content_block_stop" => {
                let index = event.index;
                self.open_blocks.remove(&index);
                self.finalize_block(index);
                LineOutcome::Chunk(StreamChunk::ContentBlockStop { index })
            }

            "message_delta" => {
                if let Some(delta) = event.delta {
                    if let Some(reason) = delta.stop_reason {
                        self.response.stop_reason = Some(reason);
                    }
                }
                if let Some(usage) = event.usage {
                    self.response.usage.output_tokens = usage.output_tokens;
                }
                LineOutcome::Nothing
            }

            "message_stop" => LineOutcome::Chunk(StreamChunk::MessageStop),

            "ping" => LineOutcome::Nothing,

            "error" => {
                let message = event
                    .error
                    .map(|e| e.message)
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "unknown stream error".to_string());
                LineOutcome::Chunk(StreamChunk::Error { message })
            }

            _ => LineOutcome::Nothing,
        }
    }

    /// Parse the accumulated side buffer into the tool_use input. An empty
    /// buffer leaves the block's initial `input` in place; an unparseable
    /// buffer is dropped with a warning rather than corrupting the block.
    fn finalize_block(&mut self, index: usize) {
        let Some(buffer) = self.tool_inputs.remove(&index) else {
            return;
        };
        let Some(ContentBlock::ToolUse { input, .. }) = self.response.content.get_mut(index)
        else {
            return;
        };

        match serde_json::from_str(&buffer) {
            Ok(parsed) => *input = parsed,
            Err(err) => {
                warn!(index, error = %err, "tool input buffer did not parse, keeping initial input");
            }
        }
    }
}
