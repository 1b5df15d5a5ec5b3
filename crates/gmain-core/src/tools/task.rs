//! The `task` tool: launches a sub-agent loop.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::registry::{parse_params, Tool, ToolContext, ToolResult};
use crate::agents::AgentRegistry;

pub const TASK_TOOL_NAME: &str = "task";

/// Runs a named sub-agent to completion and returns its final text.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute_agent(
        &self,
        agent_name: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct TaskInput {
    subagent_type: String,
    #[serde(default)]
    description: String,
    prompt: String,
    #[serde(default)]
    run_in_background: bool,
}

/// Tool surface over the sub-agent executor.
pub struct TaskTool {
    agents: Arc<AgentRegistry>,
    executor: Arc<dyn TaskExecutor>,
}

impl TaskTool {
    pub fn new(agents: Arc<AgentRegistry>, executor: Arc<dyn TaskExecutor>) -> Self {
        Self { agents, executor }
    }
}

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str {
        TASK_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Launch a specialized agent to handle complex, multi-step tasks autonomously.

Available agents:
- explore: Fast agent for codebase exploration (read-only)

Agents run independently and return their final answer as the tool result."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "subagent_type": {
                    "type": "string",
                    "description": "The type of agent to launch"
                },
                "description": {
                    "type": "string",
                    "description": "A short description (3-5 words) of what the agent will do"
                },
                "prompt": {
                    "type": "string",
                    "description": "The task for the agent to perform"
                },
                "run_in_background": {
                    "type": "boolean",
                    "description": "Set to true to run this agent in the background",
                    "default": false
                }
            },
            "required": ["subagent_type", "prompt"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let input: TaskInput = match parse_params(params) {
            Ok(input) => input,
            Err(result) => return result,
        };

        if input.subagent_type.is_empty() || input.prompt.is_empty() {
            return ToolResult::error("subagent_type and prompt are required");
        }

        let agent_name = input.subagent_type.as_str();
        let agent = match self.agents.get(agent_name) {
            Ok(agent) => agent,
            Err(err) => return ToolResult::error(format!("agent {agent_name} not found: {err}")),
        };

        if !agent.is_subagent() {
            return ToolResult::error(format!("agent {agent_name} is not a subagent"));
        }

        if input.run_in_background {
            // Independent task, fresh cancellation scope: the result is not
            // surfaced to the parent turn.
            let executor = self.executor.clone();
            let name = agent.name.clone();
            let prompt = input.prompt.clone();
            tokio::spawn(async move {
                let cancel = CancellationToken::new();
                if let Err(err) = executor.execute_agent(&name, &prompt, &cancel).await {
                    tracing::warn!(agent = %name, error = %err, "background agent failed");
                }
            });

            return ToolResult::success(format!(
                "Agent '{}' launched in background: {}",
                agent.name, input.description
            ));
        }

        info!(agent = %agent.name, "running sub-agent");
        match self
            .executor
            .execute_agent(&agent.name, &input.prompt, &ctx.cancel)
            .await
        {
            Ok(output) => ToolResult::success(output),
            Err(err) => ToolResult::error(format!("agent execution failed: {err}")),
        }
    }
}
