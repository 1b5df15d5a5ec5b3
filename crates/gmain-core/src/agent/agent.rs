//! The agent loop.
//!
//! One user turn is a bounded sequence of stream request → incremental
//! parsing → tool dispatch under policy → conversation mutation → context
//! budget enforcement, repeated until the model stops asking for tools.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use anyhow::{anyhow, Result};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agents::{AgentInfo, AgentRegistry};
use crate::ai::client::Transport;
use crate::ai::sse::{StreamChunk, StreamReader};
use crate::ai::types::{ContentBlock, MessagesRequest, Role, Usage};
use crate::compaction::{self, CompactInput, Compactor, ModelLimits, TokenUsage};
use crate::error::{is_cancelled, Cancelled};
use crate::permission::repeat::REPEAT_THRESHOLD;
use crate::permission::{
    AskInput, AskRequest, Evaluator, PermissionPrompt, RepeatCallDetector,
};
use crate::session::{SessionState, TokenTotals};
use crate::tools::{ToolContext, ToolRegistry, ToolResult, SWITCH_AGENT_TOOL_NAME};

use super::conversation::Conversation;
use super::events::{AgentEvent, EventHandler};

/// Shared collaborators the loop depends on.
pub struct AgentServices {
    pub transport: Arc<dyn Transport>,
    pub tools: Arc<ToolRegistry>,
    pub agents: Arc<AgentRegistry>,
    pub evaluator: Arc<Evaluator>,
    pub repeat: Arc<RepeatCallDetector>,
    /// Channel to the user for ask-action escalation. Sub-agents run
    /// without one.
    pub prompt: Option<Arc<dyn PermissionPrompt>>,
}

/// Per-loop configuration. Empty fields take defaults.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Empty generates a `session-<ts>` id.
    pub session_id: String,
    pub work_dir: PathBuf,
    /// Empty uses the registry default.
    pub initial_agent: String,
    pub limits: ModelLimits,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            session_id: String::new(),
            work_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            initial_agent: String::new(),
            limits: ModelLimits::default(),
        }
    }
}

/// The loop coordinator for one conversation.
pub struct Agent {
    transport: Arc<dyn Transport>,
    tools: Arc<ToolRegistry>,
    agents: Arc<AgentRegistry>,
    evaluator: Arc<Evaluator>,
    repeat: Arc<RepeatCallDetector>,
    prompt: Option<Arc<dyn PermissionPrompt>>,
    compactor: Compactor,
    conversation: Conversation,
    session: SessionState,
    work_dir: PathBuf,
    limits: ModelLimits,
    current_agent: RwLock<String>,
    handler: RwLock<Option<EventHandler>>,
}

impl Agent {
    pub fn new(services: AgentServices, config: AgentConfig) -> Result<Self> {
        let initial = if config.initial_agent.is_empty() {
            services.agents.get_default()?
        } else {
            services.agents.get(&config.initial_agent)?
        };

        let session = if config.session_id.is_empty() {
            SessionState::with_generated_id()
        } else {
            SessionState::new(config.session_id)
        };

        let system = initial.system_prompt_for(&config.work_dir.display().to_string());

        Ok(Self {
            compactor: Compactor::new(services.transport.clone()),
            transport: services.transport,
            tools: services.tools,
            agents: services.agents,
            evaluator: services.evaluator,
            repeat: services.repeat,
            prompt: services.prompt,
            conversation: Conversation::new(system),
            session,
            work_dir: config.work_dir,
            limits: config.limits,
            current_agent: RwLock::new(initial.name),
            handler: RwLock::new(None),
        })
    }

    /// Install the single event subscriber.
    pub fn set_event_handler(&self, handler: EventHandler) {
        let mut slot = self.handler.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(handler);
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn current_agent(&self) -> String {
        self.current_agent
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn token_usage(&self) -> TokenTotals {
        self.session.totals()
    }

    /// Drop the conversation history. The system prompt stays.
    pub fn clear(&self) {
        self.conversation.clear();
    }

    /// Swap the active persona: new system prompt, same history.
    pub fn switch_agent(&self, name: &str) -> Result<()> {
        let info = self.agents.get(name)?;

        {
            let mut current = self.current_agent.write().unwrap_or_else(|e| e.into_inner());
            *current = info.name.clone();
        }
        self.conversation
            .set_system(info.system_prompt_for(&self.work_dir.display().to_string()));

        self.emit(AgentEvent::AgentSwitch {
            name: info.name.clone(),
        });
        Ok(())
    }

    /// Concatenated text of the last assistant message.
    pub fn last_assistant_text(&self) -> String {
        self.conversation
            .messages()
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.text())
            .unwrap_or_default()
    }

    /// One user turn: append the text and loop until quiescence.
    pub async fn chat(&self, cancel: &CancellationToken, user_text: impl Into<String>) -> Result<()> {
        self.conversation.append_user_text(user_text);
        self.run_loop(cancel).await
    }

    async fn run_loop(&self, cancel: &CancellationToken) -> Result<()> {
        let mut iteration = 0usize;

        loop {
            iteration += 1;

            if cancel.is_cancelled() {
                return Err(Cancelled.into());
            }

            let persona = self.agents.get(&self.current_agent())?;

            if let Some(cap) = persona.max_steps {
                if iteration > cap {
                    self.emit(AgentEvent::ConversationEnd {
                        note: Some(format!("stopped after reaching the {cap}-step limit")),
                    });
                    return Ok(());
                }
            }

            let req = self.build_request(&persona).await;

            let mut reader = match self.transport.stream_message(&req, cancel).await {
                Ok(reader) => reader,
                Err(err) => {
                    if is_cancelled(&err) {
                        return Err(err);
                    }
                    self.emit(AgentEvent::Error {
                        message: format!("failed to send message: {err}"),
                    });
                    return Err(err);
                }
            };

            let stream_outcome = self.process_stream(cancel, &mut reader).await;
            let response = reader.into_response();

            // Harvest usage even when the stream failed partway.
            if response.usage != Usage::default() {
                self.session.track(&response.usage);
                self.emit(AgentEvent::TokenUsage {
                    usage: response.usage,
                });
            }

            // A cancelled or broken stream aborts the turn before any
            // partial assistant content reaches the conversation.
            stream_outcome?;

            let content: Vec<ContentBlock> = response
                .content
                .into_iter()
                .filter(|block| match block {
                    ContentBlock::Text { text } => !text.is_empty(),
                    _ => true,
                })
                .collect();
            let calls: Vec<ContentBlock> =
                content.iter().filter(|b| b.is_tool_use()).cloned().collect();

            if !content.is_empty() {
                self.conversation.append_assistant(content);
            }

            if let Err(err) = self.check_and_compact(cancel).await {
                if is_cancelled(&err) {
                    return Err(err);
                }
                warn!(error = %err, "compaction failed, continuing without it");
            }

            if calls.is_empty() {
                self.emit(AgentEvent::ConversationEnd { note: None });
                return Ok(());
            }

            let results = self.execute_tool_calls(cancel, &calls).await?;
            self.conversation.append_tool_results(results);

            if cancel.is_cancelled() {
                return Err(Cancelled.into());
            }
        }
    }

    async fn build_request(&self, persona: &AgentInfo) -> MessagesRequest {
        let (system, messages) = self.conversation.snapshot();
        let tools = self.tools.to_api_tools().await;

        MessagesRequest {
            model: persona.model.clone().unwrap_or_default(),
            max_tokens: 0,
            system: (!system.is_empty()).then_some(system),
            messages,
            tools: (!tools.is_empty()).then_some(tools),
            stream: true,
            temperature: persona.temperature,
        }
    }

    /// Consume the stream, emitting events as chunks arrive. The
    /// accumulator stays on the reader; the caller harvests it afterwards.
    async fn process_stream(
        &self,
        cancel: &CancellationToken,
        reader: &mut StreamReader,
    ) -> Result<()> {
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(Cancelled.into()),
                chunk = reader.next() => chunk?,
            };

            let Some(chunk) = chunk else {
                return Ok(());
            };

            match chunk {
                StreamChunk::Text { text, .. } => {
                    self.emit(AgentEvent::Text { text });
                }
                StreamChunk::ToolUseStart { id, name, .. } => {
                    self.emit(AgentEvent::ToolUseStart { id, name });
                }
                StreamChunk::Error { message } => {
                    self.emit(AgentEvent::Error {
                        message: message.clone(),
                    });
                    return Err(anyhow!("stream error: {message}"));
                }
                StreamChunk::ToolUseDelta { .. }
                | StreamChunk::ContentBlockStop { .. }
                | StreamChunk::MessageStop => {}
            }
        }
    }

    /// Execute a batch of tool calls in model order. Local failures
    /// (permission denial, tool errors, repeat-call refusal) become
    /// `is_error` results; cancellation fills the remaining slots with
    /// synthetic results so no tool_use id is left unanswered.
    async fn execute_tool_calls(
        &self,
        cancel: &CancellationToken,
        calls: &[ContentBlock],
    ) -> Result<Vec<ContentBlock>> {
        let mut results = Vec::with_capacity(calls.len());

        for call in calls {
            let ContentBlock::ToolUse { id, name, input } = call else {
                continue;
            };

            if cancel.is_cancelled() {
                results.push(ContentBlock::tool_result(
                    id,
                    "Tool execution cancelled",
                    true,
                ));
                continue;
            }

            info!(tool = %name, id = %id, "tool call");

            if name == SWITCH_AGENT_TOOL_NAME {
                let result = self.handle_switch_agent(input);
                self.emit(AgentEvent::ToolUseEnd {
                    id: id.clone(),
                    name: name.clone(),
                    output: result.output.clone(),
                    is_error: result.is_error,
                });
                results.push(ContentBlock::tool_result(id, result.output, result.is_error));
                continue;
            }

            let persona = self.agents.get(&self.current_agent())?;
            let pattern = extract_pattern(name, input);

            if let Some(denial) = self.check_repeat_tripwire(name, input, &pattern).await {
                self.emit(AgentEvent::ToolUseEnd {
                    id: id.clone(),
                    name: name.clone(),
                    output: denial.clone(),
                    is_error: true,
                });
                results.push(ContentBlock::tool_result(id, denial, true));
                continue;
            }

            let allowed = self
                .evaluator
                .ask(AskInput {
                    session_id: self.session.id(),
                    permission: name,
                    pattern: &pattern,
                    ruleset: &persona.permission,
                    message: format!("Allow tool '{name}' with pattern '{pattern}'?"),
                    prompt: self.prompt.clone(),
                })
                .await;

            if allowed.is_err() {
                let output = format!(
                    "Permission denied: agent '{}' is not allowed to use tool '{}' with pattern '{}'",
                    persona.name, name, pattern
                );
                self.emit(AgentEvent::ToolUseEnd {
                    id: id.clone(),
                    name: name.clone(),
                    output: output.clone(),
                    is_error: true,
                });
                results.push(ContentBlock::tool_result(id, output, true));
                continue;
            }

            let ctx = ToolContext {
                working_dir: self.work_dir.clone(),
                session_id: self.session.id().to_string(),
                cancel: cancel.clone(),
            };

            let start = Instant::now();
            let result = match self.tools.execute(name, input.clone(), &ctx).await {
                Ok(result) => result,
                // Invocation-mechanism failures (unknown tool, bad params)
                // take the same shape as tool failures.
                Err(err) => ToolResult::error(err.to_string()),
            };
            let duration = start.elapsed();

            let truncated =
                compaction::truncate_output(&result.output, self.session.id(), name, id);

            info!(
                tool = %name,
                id = %id,
                is_error = result.is_error,
                duration_ms = duration.as_millis() as u64,
                truncated = truncated.truncated,
                "tool result"
            );

            self.emit(AgentEvent::ToolUseEnd {
                id: id.clone(),
                name: name.clone(),
                output: truncated.content.clone(),
                is_error: result.is_error,
            });
            results.push(ContentBlock::tool_result(
                id,
                truncated.content,
                result.is_error,
            ));
        }

        Ok(results)
    }

    /// Repeat-call tripwire: on the threshold, ask the user when a prompt
    /// channel exists; a refusal is a denial. Without a channel the loop
    /// continues and the counters reset.
    async fn check_repeat_tripwire(
        &self,
        name: &str,
        input: &Value,
        pattern: &str,
    ) -> Option<String> {
        if !self.repeat.check(self.session.id(), name, input) {
            return None;
        }

        let Some(prompt) = &self.prompt else {
            self.repeat.reset_tool(self.session.id(), name);
            return None;
        };

        let request = AskRequest {
            permission: name.to_string(),
            pattern: pattern.to_string(),
            message: format!(
                "Tool '{name}' has been called {REPEAT_THRESHOLD}+ times with identical arguments. Continue?"
            ),
        };

        match prompt.ask(request).await {
            Ok(response) if response.approved && !response.rejected => {
                self.repeat.reset_tool(self.session.id(), name);
                None
            }
            Ok(_) => Some(format!(
                "Tool '{name}' repeated too many times with identical arguments; user declined to continue"
            )),
            Err(err) => {
                warn!(tool = name, error = %err, "repeat-call prompt failed");
                Some(format!(
                    "Tool '{name}' repeated too many times with identical arguments; user declined to continue"
                ))
            }
        }
    }

    fn handle_switch_agent(&self, input: &Value) -> ToolResult {
        let Some(name) = input.get("agent").and_then(Value::as_str) else {
            return ToolResult::error("missing 'agent' parameter");
        };

        match self.switch_agent(name) {
            Ok(()) => ToolResult::success(format!("Switched to agent '{name}'")),
            Err(err) => ToolResult::error(err.to_string()),
        }
    }

    /// Context budget check: prune first, summarize when pruning freed
    /// nothing.
    async fn check_and_compact(&self, cancel: &CancellationToken) -> Result<()> {
        let totals = self.session.totals();
        let usage = TokenUsage {
            input: totals.input,
            output: totals.output,
            cache_read: totals.cache_read,
        };

        if !compaction::needs_compaction(usage, self.limits) {
            return Ok(());
        }

        self.emit(AgentEvent::Compaction {
            info: "Starting conversation compaction".to_string(),
        });

        let messages = self.conversation.messages();
        if compaction::can_prune(&messages) {
            let pruned = compaction::prune(&messages);
            if pruned.pruned_count > 0 {
                self.conversation.set_messages(pruned.messages);
                self.emit(AgentEvent::Compaction {
                    info: format!(
                        "Pruned {} tool results ({} chars)",
                        pruned.pruned_count, pruned.pruned_chars
                    ),
                });
                return Ok(());
            }
        }

        let compacted = self
            .compactor
            .compact(
                cancel,
                CompactInput {
                    messages,
                    model: self.transport.model().to_string(),
                    max_tokens: 0,
                    keep_recent: 0,
                },
            )
            .await?;

        self.conversation.set_messages(compacted.messages);
        self.emit(AgentEvent::Compaction {
            info: format!(
                "Compacted {} messages into summary",
                compacted.compacted_count
            ),
        });
        Ok(())
    }

    fn emit(&self, event: AgentEvent) {
        let handler = self.handler.read().unwrap_or_else(|e| e.into_inner());
        if let Some(handler) = handler.as_ref() {
            handler(event);
        }
    }
}

/// Extract the pattern used for permission checking from tool input.
fn extract_pattern(tool: &str, input: &Value) -> String {
    let field = match tool {
        "read" | "write" | "edit" => "file_path",
        "bash" => "command",
        "glob" | "grep" => "pattern",
        _ => return "*".to_string(),
    };
    input
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or("*")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pattern_extraction_per_tool() {
        assert_eq!(
            extract_pattern("read", &json!({"file_path": "/a/b.rs"})),
            "/a/b.rs"
        );
        assert_eq!(
            extract_pattern("write", &json!({"file_path": "out.md"})),
            "out.md"
        );
        assert_eq!(
            extract_pattern("bash", &json!({"command": "ls -la"})),
            "ls -la"
        );
        assert_eq!(
            extract_pattern("glob", &json!({"pattern": "**/*.rs"})),
            "**/*.rs"
        );
        assert_eq!(
            extract_pattern("grep", &json!({"pattern": "fn main"})),
            "fn main"
        );
        assert_eq!(extract_pattern("webfetch", &json!({"url": "x"})), "*");
        assert_eq!(extract_pattern("bash", &json!({})), "*");
    }
}
