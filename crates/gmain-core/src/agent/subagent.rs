//! Sub-agent execution.
//!
//! The `task` tool's invocation spawns a fresh loop sharing the top-level
//! transport, tool registry and agent registry. The nested conversation is
//! allocated per invocation and discarded when the loop returns; the final
//! assistant text becomes the tool output.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::agents::AgentRegistry;
use crate::ai::client::Transport;
use crate::compaction::ModelLimits;
use crate::permission::{Evaluator, RepeatCallDetector};
use crate::tools::{TaskExecutor, ToolRegistry};

use super::agent::{Agent, AgentConfig, AgentServices};

/// Bound on concurrently running sub-agents.
pub const DEFAULT_MAX_CONCURRENCY: usize = 3;

static SUB_SESSION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Spawns nested loops for sub-personas.
pub struct SubAgentExecutor {
    transport: Arc<dyn Transport>,
    agents: Arc<AgentRegistry>,
    evaluator: Arc<Evaluator>,
    repeat: Arc<RepeatCallDetector>,
    work_dir: PathBuf,
    limits: ModelLimits,
    // Weak: the tool registry owns the task tool, which owns this executor.
    // A strong reference here would cycle the Arcs.
    tools: OnceLock<Weak<ToolRegistry>>,
    semaphore: Arc<Semaphore>,
}

impl SubAgentExecutor {
    pub fn new(
        transport: Arc<dyn Transport>,
        agents: Arc<AgentRegistry>,
        evaluator: Arc<Evaluator>,
        repeat: Arc<RepeatCallDetector>,
        work_dir: PathBuf,
        limits: ModelLimits,
    ) -> Self {
        Self {
            transport,
            agents,
            evaluator,
            repeat,
            work_dir,
            limits,
            tools: OnceLock::new(),
            semaphore: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENCY)),
        }
    }

    /// Late-bind the tool registry (it holds the task tool holding this
    /// executor). Call once at assembly time.
    pub fn bind_tools(&self, tools: &Arc<ToolRegistry>) {
        let _ = self.tools.set(Arc::downgrade(tools));
    }

    fn tools(&self) -> Result<Arc<ToolRegistry>> {
        self.tools
            .get()
            .and_then(Weak::upgrade)
            .context("tool registry no longer available")
    }
}

#[async_trait]
impl TaskExecutor for SubAgentExecutor {
    async fn execute_agent(
        &self,
        agent_name: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let info = self.agents.get(agent_name)?;
        if !info.is_subagent() {
            bail!("agent {agent_name} is not a subagent");
        }

        let tools = self.tools()?;
        let _permit = self
            .semaphore
            .acquire()
            .await
            .context("sub-agent semaphore closed")?;

        let seq = SUB_SESSION_SEQ.fetch_add(1, Ordering::Relaxed);
        let session_id = format!("{}-sub-{}-{}", agent_name, chrono::Utc::now().timestamp(), seq);

        info!(agent = agent_name, session = %session_id, "sub-agent starting");

        let agent = Agent::new(
            AgentServices {
                transport: self.transport.clone(),
                tools,
                agents: self.agents.clone(),
                evaluator: self.evaluator.clone(),
                repeat: self.repeat.clone(),
                prompt: None,
            },
            AgentConfig {
                session_id,
                work_dir: self.work_dir.clone(),
                initial_agent: agent_name.to_string(),
                limits: self.limits,
            },
        )?;

        agent.chat(cancel, prompt).await?;
        Ok(agent.last_assistant_text())
    }
}

/// A fan-out request for [`ParallelSubAgentExecutor`].
#[derive(Debug, Clone)]
pub struct SubAgentRequest {
    pub agent_name: String,
    pub prompt: String,
}

/// Outcome of one fanned-out sub-agent.
#[derive(Debug, Clone)]
pub struct SubAgentOutcome {
    pub agent_name: String,
    pub output: String,
    pub error: Option<String>,
}

/// Joins a batch of independent sub-agent runs. The underlying executor's
/// semaphore bounds actual concurrency.
pub struct ParallelSubAgentExecutor {
    executor: Arc<dyn TaskExecutor>,
}

impl ParallelSubAgentExecutor {
    pub fn new(executor: Arc<dyn TaskExecutor>) -> Self {
        Self { executor }
    }

    /// Run every request and return outcomes in request order.
    pub async fn execute_parallel(
        &self,
        cancel: &CancellationToken,
        requests: Vec<SubAgentRequest>,
    ) -> Vec<SubAgentOutcome> {
        let futures = requests.into_iter().map(|request| {
            let executor = self.executor.clone();
            let cancel = cancel.clone();
            async move {
                match executor
                    .execute_agent(&request.agent_name, &request.prompt, &cancel)
                    .await
                {
                    Ok(output) => SubAgentOutcome {
                        agent_name: request.agent_name,
                        output,
                        error: None,
                    },
                    Err(err) => SubAgentOutcome {
                        agent_name: request.agent_name,
                        output: String::new(),
                        error: Some(err.to_string()),
                    },
                }
            }
        });

        futures::future::join_all(futures).await
    }
}
