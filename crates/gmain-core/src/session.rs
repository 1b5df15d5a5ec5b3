//! Session-scoped state: identifier and token counters.

use std::sync::Mutex;

use crate::ai::types::Usage;

/// Cumulative token counters for a session. Mutated only by the owning loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenTotals {
    pub input: usize,
    pub output: usize,
    pub cache_read: usize,
    pub cache_write: usize,
}

/// A session begins at process start (or per sub-agent invocation) and owns
/// its counters.
#[derive(Debug)]
pub struct SessionState {
    id: String,
    totals: Mutex<TokenTotals>,
}

impl SessionState {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            totals: Mutex::new(TokenTotals::default()),
        }
    }

    /// Session id derived from the wall clock, the way fresh sessions are
    /// minted at process start.
    pub fn with_generated_id() -> Self {
        let ts = chrono::Utc::now().timestamp();
        Self::new(format!("session-{ts}"))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn track(&self, usage: &Usage) {
        let mut totals = self.totals.lock().unwrap_or_else(|e| e.into_inner());
        totals.input += usage.input_tokens;
        totals.output += usage.output_tokens;
        totals.cache_read += usage.cache_read_input_tokens;
        totals.cache_write += usage.cache_creation_input_tokens;
    }

    pub fn totals(&self) -> TokenTotals {
        *self.totals.lock().unwrap_or_else(|e| e.into_inner())
    }
}
