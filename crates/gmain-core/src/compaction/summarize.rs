//! Conversation summarization.
//!
//! Compresses the oldest portion of the conversation into a single
//! synthetic user message via a non-streaming LLM call, keeping the most
//! recent turns verbatim.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::ai::client::Transport;
use crate::ai::types::{ContentBlock, Message, MessagesRequest, Role};

/// Prefix of the synthetic summary message.
pub const SUMMARY_PREFIX: &str = "[Previous conversation summary]";

/// Recent turns preserved verbatim (message window is `2 × keep_recent`).
pub const DEFAULT_KEEP_RECENT: usize = 2;

/// Output budget for the summarization call.
pub const DEFAULT_SUMMARY_MAX_TOKENS: usize = 4_000;

/// Tool results are clipped to this many chars in the transcript.
const TRANSCRIPT_RESULT_LIMIT: usize = 500;

const SUMMARIZATION_SYSTEM_PROMPT: &str = "You are a summarization assistant. Your task is to create a concise but comprehensive summary of the conversation history.

Focus on:
- Key decisions and actions taken
- Important technical details and context
- Unresolved issues or ongoing tasks
- File changes and code modifications

Keep the summary clear and organized.";

/// Input to [`Compactor::compact`]. Zero-valued fields take the defaults.
#[derive(Debug, Clone)]
pub struct CompactInput {
    pub messages: Vec<Message>,
    pub model: String,
    pub max_tokens: usize,
    pub keep_recent: usize,
}

/// Outcome of a summarization pass.
#[derive(Debug, Clone)]
pub struct CompactResult {
    pub summary: String,
    pub original_count: usize,
    pub compacted_count: usize,
    pub messages: Vec<Message>,
}

/// Summarizer driving a nested, non-streaming LLM call.
pub struct Compactor {
    transport: Arc<dyn Transport>,
}

impl Compactor {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Partition messages into a head to compact and a tail of
    /// `2 × keep_recent` preserved messages, then replace the head with one
    /// summary message. When the tail already begins with a user message
    /// the summary text is merged into it, so two consecutive user messages
    /// never reach the API.
    pub async fn compact(
        &self,
        cancel: &CancellationToken,
        input: CompactInput,
    ) -> Result<CompactResult> {
        let keep_recent = if input.keep_recent == 0 {
            DEFAULT_KEEP_RECENT
        } else {
            input.keep_recent
        };
        let max_tokens = if input.max_tokens == 0 {
            DEFAULT_SUMMARY_MAX_TOKENS
        } else {
            input.max_tokens
        };

        let original_count = input.messages.len();
        if original_count <= keep_recent * 2 {
            return Ok(CompactResult {
                summary: String::new(),
                original_count,
                compacted_count: 0,
                messages: input.messages,
            });
        }

        let split_at = original_count - keep_recent * 2;
        let (head, tail) = input.messages.split_at(split_at);

        let summary = self
            .generate_summary(cancel, head, &input.model, max_tokens)
            .await?;

        let summary_text = format!("{SUMMARY_PREFIX}\n\n{summary}");
        let mut messages = Vec::with_capacity(tail.len() + 1);

        match tail.first() {
            Some(first) if first.role == Role::User => {
                let mut merged = first.clone();
                merged
                    .content
                    .insert(0, ContentBlock::text(summary_text));
                messages.push(merged);
                messages.extend_from_slice(&tail[1..]);
            }
            _ => {
                messages.push(Message::user_text(summary_text));
                messages.extend_from_slice(tail);
            }
        }

        info!(
            compacted = split_at,
            kept = tail.len(),
            "conversation summarized"
        );

        Ok(CompactResult {
            summary,
            original_count,
            compacted_count: split_at,
            messages,
        })
    }

    async fn generate_summary(
        &self,
        cancel: &CancellationToken,
        messages: &[Message],
        model: &str,
        max_tokens: usize,
    ) -> Result<String> {
        let transcript = build_transcript(messages);

        let req = MessagesRequest {
            model: model.to_string(),
            max_tokens,
            system: Some(SUMMARIZATION_SYSTEM_PROMPT.to_string()),
            messages: vec![Message::user_text(format!(
                "Please summarize the following conversation:\n\n{transcript}"
            ))],
            tools: None,
            stream: false,
            temperature: None,
        };

        let resp = self.transport.create_message(&req, cancel).await?;
        resp.content
            .iter()
            .find_map(|block| match block {
                ContentBlock::Text { text } => Some(text.clone()),
                _ => None,
            })
            .ok_or_else(|| anyhow!("summarization response contained no text"))
    }
}

/// Serialize messages into a role-tagged transcript. Tool calls render by
/// name and input; tool results are clipped to 500 chars.
pub fn build_transcript(messages: &[Message]) -> String {
    let mut out = String::new();

    for message in messages {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        out.push_str(&format!("\n[{role}]\n"));

        for block in &message.content {
            match block {
                ContentBlock::Text { text } => {
                    out.push_str(text);
                    out.push('\n');
                }
                ContentBlock::ToolUse { name, input, .. } => {
                    out.push_str(&format!("[Tool Called: {name}]\n"));
                    out.push_str(&format!("Input: {input}\n"));
                }
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => {
                    out.push_str(&format!("[Tool Result: {tool_use_id}]\n"));
                    if content.len() > TRANSCRIPT_RESULT_LIMIT {
                        let cut = floor_char_boundary(content, TRANSCRIPT_RESULT_LIMIT);
                        out.push_str(&content[..cut]);
                        out.push_str("...\n");
                    } else {
                        out.push_str(content);
                        out.push('\n');
                    }
                }
            }
        }
    }

    out
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut boundary = index.min(text.len());
    while boundary > 0 && !text.is_char_boundary(boundary) {
        boundary -= 1;
    }
    boundary
}
