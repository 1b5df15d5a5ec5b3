//! Conversation store.
//!
//! An append-only message sequence plus a mutable system prompt, guarded by
//! one reader/writer lock. Accessors hand out deep copies so callers can
//! never mutate stored state. Writes are serialized; concurrent reads are
//! fine. The loose role-alternation invariant (no two consecutive assistant
//! messages) is maintained by the loop, the only writer.

use std::sync::RwLock;

use crate::ai::types::{ContentBlock, Message, Role};

pub struct Conversation {
    inner: RwLock<Inner>,
}

struct Inner {
    system: String,
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                system: system.into(),
                messages: Vec::new(),
            }),
        }
    }

    pub fn append(&self, message: Message) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.messages.push(message);
    }

    pub fn append_user_text(&self, text: impl Into<String>) {
        self.append(Message::user_text(text));
    }

    pub fn append_assistant(&self, content: Vec<ContentBlock>) {
        self.append(Message::assistant(content));
    }

    /// Append a batch of tool results as one user message, so the next
    /// request's history has a single tool-response turn.
    pub fn append_tool_results(&self, results: Vec<ContentBlock>) {
        self.append(Message {
            role: Role::User,
            content: results,
        });
    }

    /// Deep copy of the message history.
    pub fn messages(&self) -> Vec<Message> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.messages.clone()
    }

    /// Swap the history wholesale (compaction installs its result here).
    pub fn set_messages(&self, messages: Vec<Message>) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.messages = messages;
    }

    pub fn system(&self) -> String {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.system.clone()
    }

    /// The system prompt is mutable, but only between turns.
    pub fn set_system(&self, system: impl Into<String>) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.system = system.into();
    }

    /// Drop all messages; the system prompt is untouched.
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.messages.clear();
    }

    pub fn message_count(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.messages.len()
    }

    pub fn last_message(&self) -> Option<Message> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.messages.last().cloned()
    }

    /// (system prompt, messages) snapshot taken under one read lock.
    pub fn snapshot(&self) -> (String, Vec<Message>) {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        (inner.system.clone(), inner.messages.clone())
    }
}
