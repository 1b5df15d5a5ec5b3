//! Event protocol between the loop and its single subscriber.
//!
//! Events carry only primitives and pre-formatted strings; presentation
//! belongs to the consumer. Emission is synchronous and total-ordered per
//! turn.

use serde::Serialize;

use crate::ai::types::Usage;

/// Events emitted by the agent loop.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Streamed assistant text delta.
    Text { text: String },

    /// The model opened a tool call.
    ToolUseStart { id: String, name: String },

    /// A tool call finished (executed, denied, or synthesized).
    ToolUseEnd {
        id: String,
        name: String,
        output: String,
        is_error: bool,
    },

    /// The active persona changed.
    AgentSwitch { name: String },

    /// The compactor ran (or started running).
    Compaction { info: String },

    /// Usage counters harvested from a response.
    TokenUsage { usage: Usage },

    /// A non-fatal or fatal error the subscriber should surface.
    Error { message: String },

    /// The turn finished; `note` explains early stops (e.g. step cap).
    ConversationEnd { note: Option<String> },
}

/// Synchronous single-subscriber handler.
pub type EventHandler = Box<dyn Fn(AgentEvent) + Send + Sync>;
