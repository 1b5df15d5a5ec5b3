//! The agent loop and its surroundings.
//!
//! - [`Agent`] — the coordinator for one conversation (C9)
//! - [`Conversation`] — mutex-guarded message store (C5)
//! - [`AgentEvent`] — the synchronous event protocol to the UI
//! - [`SubAgentExecutor`] — nested loops for sub-personas (C10)

pub mod agent;
pub mod conversation;
pub mod events;
pub mod subagent;

pub use agent::{Agent, AgentConfig, AgentServices};
pub use conversation::Conversation;
pub use events::{AgentEvent, EventHandler};
pub use subagent::{
    ParallelSubAgentExecutor, SubAgentExecutor, SubAgentOutcome, SubAgentRequest,
    DEFAULT_MAX_CONCURRENCY,
};
