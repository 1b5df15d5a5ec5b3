//! Permission rules and rulesets.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome of evaluating a (permission, pattern) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Deny,
    Ask,
}

/// A single ordered rule. `permission` is a tool name or `"*"`; `pattern`
/// is a glob matched against the call's extracted pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub permission: String,
    pub pattern: String,
    pub action: Action,
}

/// Ordered rules plus boolean overrides. First matching rule wins; with no
/// match the evaluator falls back to asking.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ruleset {
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub allow_all: bool,
    #[serde(default)]
    pub deny_all: bool,
    #[serde(default)]
    pub default_ask: bool,
}

impl Ruleset {
    /// Empty ruleset that asks for everything.
    pub fn default_ask() -> Self {
        Self {
            default_ask: true,
            ..Default::default()
        }
    }

    pub fn allow_all() -> Self {
        Self {
            allow_all: true,
            ..Default::default()
        }
    }

    pub fn deny_all() -> Self {
        Self {
            deny_all: true,
            ..Default::default()
        }
    }

    pub fn add_rule(
        &mut self,
        permission: impl Into<String>,
        pattern: impl Into<String>,
        action: Action,
    ) -> &mut Self {
        self.rules.push(Rule {
            permission: permission.into(),
            pattern: pattern.into(),
            action,
        });
        self
    }
}

/// A permission request was denied, either by rule or by the user.
#[derive(Debug, Clone)]
pub struct RejectedError {
    pub permission: String,
    pub pattern: String,
    pub message: String,
}

impl RejectedError {
    pub fn new(
        permission: impl Into<String>,
        pattern: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            permission: permission.into(),
            pattern: pattern.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for RejectedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RejectedError {}
