//! Tool registry and the core-owned tools (`task`, `switch_agent`).
//!
//! Workspace tools (shell, file I/O, search) live outside the core and are
//! registered by the embedding application.

pub mod registry;
pub mod switch_agent;
pub mod task;

pub use registry::{parse_params, Tool, ToolContext, ToolRegistry, ToolResult};
pub use switch_agent::{SwitchAgentTool, SWITCH_AGENT_TOOL_NAME};
pub use task::{TaskExecutor, TaskTool, TASK_TOOL_NAME};
