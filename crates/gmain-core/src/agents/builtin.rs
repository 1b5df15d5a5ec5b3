//! Built-in personas: build, plan and explore.

use super::info::{AgentInfo, AgentMode};
use super::registry::AgentRegistry;
use crate::permission::{Action, Ruleset};

/// Register the three built-in personas.
pub fn register_builtin_agents(registry: &AgentRegistry) -> anyhow::Result<()> {
    registry.register(build_agent())?;
    registry.register(plan_agent())?;
    registry.register(explore_agent())?;
    Ok(())
}

pub fn builtin_agent_names() -> &'static [&'static str] {
    &["build", "plan", "explore"]
}

/// Full development workflow persona.
pub fn build_agent() -> AgentInfo {
    let mut info = AgentInfo::new("build")
        .with_mode(AgentMode::Primary)
        .with_permission(build_permissions())
        .with_system_prompt(
            "You are a software development assistant with access to tools for reading, \
editing and searching code, and for running shell commands.

Guidelines:
- Read a file before editing it
- Prefer absolute paths
- Treat destructive commands with care and confirm before large changes
- Finish one task before starting the next",
        );
    info.description = "Complete development workflow agent with full permissions".to_string();
    info.native = true;
    info.temperature = Some(0.0);
    info
}

/// Read-only analysis persona; writes are confined to plan documents.
pub fn plan_agent() -> AgentInfo {
    let mut info = AgentInfo::new("plan")
        .with_mode(AgentMode::Primary)
        .with_permission(plan_permissions())
        .with_system_prompt(
            "You are a planning and analysis assistant. Analyze the codebase, identify \
dependencies and risks, and produce detailed implementation plans.

You have read-only access to the code. Plan documents go under \
.gmain-agent/plans/ and are the only files you may write.

Do NOT modify code in this mode.",
        );
    info.description =
        "Planning mode agent with read-only access for code analysis and planning".to_string();
    info.native = true;
    info.temperature = Some(0.0);
    info
}

/// Fast read-only discovery persona, invocable as a sub-agent.
pub fn explore_agent() -> AgentInfo {
    let mut info = AgentInfo::new("explore")
        .with_mode(AgentMode::Subagent)
        .with_permission(explore_permissions())
        .with_max_steps(10)
        .with_system_prompt(
            "You are a code exploration specialist. Navigate the codebase quickly: find \
relevant files, map the project structure, and summarize what you learn.

Use glob, grep and read efficiently and keep answers concise.",
        );
    info.description = "Fast exploration agent with read-only tools for codebase discovery"
        .to_string();
    info.native = true;
    info.temperature = Some(0.0);
    info
}

fn build_permissions() -> Ruleset {
    let mut ruleset = Ruleset::default();
    ruleset
        .add_rule("read", "*", Action::Allow)
        .add_rule("glob", "*", Action::Allow)
        .add_rule("grep", "*", Action::Allow)
        .add_rule("webfetch", "*", Action::Allow)
        .add_rule("edit", "*.go", Action::Allow)
        .add_rule("edit", "*.rs", Action::Allow)
        .add_rule("edit", "*.js", Action::Allow)
        .add_rule("edit", "*.ts", Action::Allow)
        .add_rule("edit", "*.py", Action::Allow)
        .add_rule("write", "*.md", Action::Allow)
        .add_rule("bash", "rm *", Action::Ask)
        .add_rule("bash", "sudo *", Action::Deny)
        .add_rule("edit", "/etc/*", Action::Deny);
    ruleset.default_ask = true;
    ruleset
}

fn plan_permissions() -> Ruleset {
    let mut ruleset = Ruleset::default();
    ruleset
        .add_rule("read", "*", Action::Allow)
        .add_rule("glob", "*", Action::Allow)
        .add_rule("grep", "*", Action::Allow)
        .add_rule("webfetch", "*", Action::Allow)
        .add_rule("websearch", "*", Action::Allow)
        .add_rule("write", ".gmain-agent/plans/*", Action::Allow)
        .add_rule("edit", ".gmain-agent/plans/*", Action::Allow)
        .add_rule("bash", "ls *", Action::Allow)
        .add_rule("bash", "cat *", Action::Allow)
        .add_rule("bash", "*", Action::Ask)
        .add_rule("edit", "*", Action::Deny)
        .add_rule("write", "*", Action::Deny);
    ruleset
}

fn explore_permissions() -> Ruleset {
    let mut ruleset = Ruleset::default();
    ruleset
        .add_rule("read", "*", Action::Allow)
        .add_rule("glob", "*", Action::Allow)
        .add_rule("grep", "*", Action::Allow)
        .add_rule("webfetch", "*", Action::Allow)
        .add_rule("websearch", "*", Action::Allow)
        .add_rule("bash", "ls *", Action::Allow)
        .add_rule("bash", "find *", Action::Allow)
        .add_rule("bash", "tree *", Action::Allow)
        .add_rule("edit", "*", Action::Deny)
        .add_rule("write", "*", Action::Deny)
        .add_rule("bash", "*", Action::Deny);
    ruleset
}
