//! Tool registry and dispatch.
//!
//! Concrete tools (shell, file I/O, search, web) are external: the core
//! only requires the dispatch contract below. Tool implementations own
//! their timeouts; the core imposes none beyond the turn's cancellation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::ai::types::ToolDefinition;

/// Result of a tool invocation. Errors the model should observe are
/// `is_error: true` with a textual output, never a crash of the loop.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub output: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self {
            output: message.to_string(),
            is_error: true,
        }
    }
}

/// Parse free-form tool parameters into a typed struct, converting failures
/// into an error result the model can react to.
pub fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, ToolResult> {
    serde_json::from_value(params)
        .map_err(|err| ToolResult::error(format!("Invalid parameters: {err}")))
}

/// Context handed to every invocation.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub working_dir: PathBuf,
    pub session_id: String,
    /// The turn's cancellation signal. Invocations must respect it.
    pub cancel: CancellationToken,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            session_id: String::new(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Capability interface for tools: registered by value once, looked up by
/// name.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name within a registry.
    fn name(&self) -> &str;

    /// Description shown to the model.
    fn description(&self) -> &str;

    /// JSON schema for the input value.
    fn input_schema(&self) -> Value;

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult;
}

/// Name → descriptor map.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        let mut tools = self.tools.write().await;
        tools.insert(name, tool);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let tools = self.tools.read().await;
        tools.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        let tools = self.tools.read().await;
        let mut names: Vec<String> = tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Export `{name, description, input_schema}` triples for the API.
    pub async fn to_api_tools(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read().await;
        let mut defs: Vec<ToolDefinition> = tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Dispatch by name. An unknown name is a hard error; failures inside
    /// the tool come back as `is_error` results.
    pub async fn execute(&self, name: &str, input: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let tool = self
            .get(name)
            .await
            .ok_or_else(|| anyhow!("unknown tool: {name}"))?;

        tracing::debug!(tool = name, "executing tool");
        Ok(tool.execute(input, ctx).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the input back"
        }

        fn input_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string"}
                },
                "required": ["text"]
            })
        }

        async fn execute(&self, params: Value, _ctx: &ToolContext) -> ToolResult {
            match params.get("text").and_then(Value::as_str) {
                Some(text) => ToolResult::success(text),
                None => ToolResult::error("missing text"),
            }
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_a_hard_error() {
        let registry = ToolRegistry::new();
        let err = registry
            .execute("missing", json!({}), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown tool: missing"));
    }

    #[tokio::test]
    async fn execute_dispatches_by_name() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).await;

        let result = registry
            .execute("echo", json!({"text": "hi"}), &ToolContext::default())
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.output, "hi");
    }

    #[tokio::test]
    async fn api_export_is_sorted_and_complete() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).await;

        let defs = registry.to_api_tools().await;
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
        assert_eq!(defs[0].description, "Echo the input back");
        assert_eq!(defs[0].input_schema["type"], "object");
    }

    #[test]
    fn parse_params_reports_shape_errors() {
        #[derive(serde::Deserialize, Debug)]
        struct Params {
            #[allow(dead_code)]
            text: String,
        }

        let err = parse_params::<Params>(json!({"text": 42})).unwrap_err();
        assert!(err.is_error);
        assert!(err.output.contains("Invalid parameters"));
    }
}
