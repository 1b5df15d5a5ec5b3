//! Persona registry: named bundles of system prompt, ruleset and model
//! parameters, with primary/sub roles.

pub mod builtin;
pub mod info;
pub mod registry;

pub use builtin::{builtin_agent_names, register_builtin_agents};
pub use info::{AgentInfo, AgentMode};
pub use registry::AgentRegistry;
