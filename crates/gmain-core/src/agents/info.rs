//! Persona definition.

use serde::{Deserialize, Serialize};

use crate::permission::Ruleset;

/// Where a persona can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Drives the primary loop (user-facing).
    Primary,
    /// Invocable through the `task` tool only.
    Subagent,
    /// Both.
    All,
}

/// A named persona: system prompt, ruleset, model parameters and role.
/// Immutable once registered; the registry clones on every read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub mode: AgentMode,
    #[serde(default)]
    pub native: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Iteration cap for the loop; `None` means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<usize>,
    pub permission: Ruleset,
    #[serde(default)]
    pub system_prompt: String,
}

impl AgentInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            mode: AgentMode::Primary,
            native: false,
            hidden: false,
            model: None,
            temperature: None,
            max_steps: None,
            permission: Ruleset::default_ask(),
            system_prompt: String::new(),
        }
    }

    pub fn with_mode(mut self, mode: AgentMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_permission(mut self, ruleset: Ruleset) -> Self {
        self.permission = ruleset;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_steps(mut self, steps: usize) -> Self {
        self.max_steps = Some(steps);
        self
    }

    pub fn is_primary(&self) -> bool {
        matches!(self.mode, AgentMode::Primary | AgentMode::All)
    }

    pub fn is_subagent(&self) -> bool {
        matches!(self.mode, AgentMode::Subagent | AgentMode::All)
    }

    /// System prompt with the working directory prepended when known.
    pub fn system_prompt_for(&self, work_dir: &str) -> String {
        if work_dir.is_empty() {
            return self.system_prompt.clone();
        }
        format!("Working Directory: {work_dir}\n\n{}", self.system_prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_predicates() {
        let primary = AgentInfo::new("a").with_mode(AgentMode::Primary);
        let sub = AgentInfo::new("b").with_mode(AgentMode::Subagent);
        let all = AgentInfo::new("c").with_mode(AgentMode::All);

        assert!(primary.is_primary() && !primary.is_subagent());
        assert!(!sub.is_primary() && sub.is_subagent());
        assert!(all.is_primary() && all.is_subagent());
    }

    #[test]
    fn system_prompt_includes_work_dir() {
        let info = AgentInfo::new("a").with_system_prompt("Do things.");
        assert_eq!(
            info.system_prompt_for("/work"),
            "Working Directory: /work\n\nDo things."
        );
        assert_eq!(info.system_prompt_for(""), "Do things.");
    }
}
