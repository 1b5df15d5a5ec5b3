//! Fan out two explore sub-agents and join their answers.
//!
//! Requires `ANTHROPIC_API_KEY`. Run with:
//!
//! ```text
//! cargo run -p gmain-core --example parallel_explore
//! ```

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use gmain_core::agent::subagent::{
    ParallelSubAgentExecutor, SubAgentExecutor, SubAgentRequest,
};
use gmain_core::agents::{register_builtin_agents, AgentRegistry};
use gmain_core::ai::{Client, Transport};
use gmain_core::compaction::ModelLimits;
use gmain_core::permission::{Evaluator, RepeatCallDetector};
use gmain_core::tools::{TaskTool, ToolRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let key = std::env::var("ANTHROPIC_API_KEY")?;
    let transport: Arc<dyn Transport> = Arc::new(Client::new(key));

    let agents = Arc::new(AgentRegistry::new());
    register_builtin_agents(&agents)?;

    let evaluator = Arc::new(Evaluator::new());
    let repeat = Arc::new(RepeatCallDetector::new());
    let work_dir = std::env::current_dir()?;

    let executor = Arc::new(SubAgentExecutor::new(
        transport.clone(),
        agents.clone(),
        evaluator,
        repeat,
        work_dir,
        ModelLimits::default(),
    ));

    let tools = Arc::new(ToolRegistry::new());
    executor.bind_tools(&tools);
    tools
        .register(Arc::new(TaskTool::new(agents.clone(), executor.clone())))
        .await;

    let parallel = ParallelSubAgentExecutor::new(executor);
    let cancel = CancellationToken::new();

    let outcomes = parallel
        .execute_parallel(
            &cancel,
            vec![
                SubAgentRequest {
                    agent_name: "explore".into(),
                    prompt: "List the crates in this workspace and what each does".into(),
                },
                SubAgentRequest {
                    agent_name: "explore".into(),
                    prompt: "Which modules handle permission checking?".into(),
                },
            ],
        )
        .await;

    for outcome in outcomes {
        match outcome.error {
            None => println!("[{}]\n{}\n", outcome.agent_name, outcome.output),
            Some(err) => eprintln!("[{}] failed: {err}", outcome.agent_name),
        }
    }

    Ok(())
}
