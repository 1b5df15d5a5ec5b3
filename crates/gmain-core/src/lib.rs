//! gmain-core — the agent control loop of an interactive, tool-using
//! coding assistant.
//!
//! The core turns each user turn into a bounded sequence of stream request,
//! incremental response parsing, tool dispatch under permission policy,
//! conversation mutation, and context budget enforcement:
//!
//! - [`agent::Agent`] — the loop coordinator; [`agent::Conversation`] — the
//!   message store; [`agent::AgentEvent`] — the event protocol to the UI
//! - [`ai`] — wire types, HTTP transport, retry governor, SSE decoder
//! - [`permission`] — rule evaluation, user escalation, repeat-call
//!   protection
//! - [`compaction`] — output truncation, tool-result pruning,
//!   summarization
//! - [`agents`] — the persona registry (build / plan / explore built in)
//! - [`tools`] — the tool registry and the core-owned `task` /
//!   `switch_agent` tools
//!
//! The terminal UI, argument parsing, config-file I/O and the concrete
//! workspace tools are external collaborators; the core exposes
//! registration, `chat`, `clear` and event-handler installation.

pub mod agent;
pub mod agents;
pub mod ai;
pub mod compaction;
pub mod config;
pub mod error;
pub mod permission;
pub mod session;
pub mod tools;

pub use agent::{Agent, AgentConfig, AgentEvent, AgentServices, Conversation, SubAgentExecutor};
pub use agents::{register_builtin_agents, AgentInfo, AgentMode, AgentRegistry};
pub use ai::{AuthType, Client, Transport};
pub use config::Config;
pub use error::Cancelled;
pub use permission::{Evaluator, PermissionPrompt, RepeatCallDetector, Ruleset};
pub use session::SessionState;
pub use tools::{TaskTool, Tool, ToolRegistry, ToolResult};
