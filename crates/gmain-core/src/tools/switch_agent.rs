//! The `switch_agent` tool descriptor.
//!
//! The agent loop intercepts this call before registry dispatch: switching
//! personas swaps the conversation's system prompt, which only the loop can
//! do. The descriptor exists so the schema reaches the model.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::registry::{Tool, ToolContext, ToolResult};

pub const SWITCH_AGENT_TOOL_NAME: &str = "switch_agent";

pub struct SwitchAgentTool;

#[async_trait]
impl Tool for SwitchAgentTool {
    fn name(&self) -> &str {
        SWITCH_AGENT_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Switch the active agent persona (e.g. build, plan). The conversation \
history is preserved; the system prompt and permission rules change."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agent": {
                    "type": "string",
                    "description": "Name of the agent to switch to"
                }
            },
            "required": ["agent"]
        })
    }

    async fn execute(&self, _params: Value, _ctx: &ToolContext) -> ToolResult {
        ToolResult::error("switch_agent is handled by the agent loop")
    }
}
