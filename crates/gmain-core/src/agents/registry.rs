//! Persona registry.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};

use super::info::{AgentInfo, AgentMode};

/// Name → persona map with a designated default. All reads return clones so
/// registered personas stay immutable from the outside.
pub struct AgentRegistry {
    inner: RwLock<Inner>,
}

struct Inner {
    agents: HashMap<String, AgentInfo>,
    default_agent: String,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                agents: HashMap::new(),
                default_agent: "build".to_string(),
            }),
        }
    }

    pub fn register(&self, info: AgentInfo) -> Result<()> {
        if info.name.is_empty() {
            bail!("agent name cannot be empty");
        }

        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.agents.contains_key(&info.name) {
            bail!("agent {} already registered", info.name);
        }
        inner.agents.insert(info.name.clone(), info);
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner
            .agents
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| anyhow!("agent {name} not found"))
    }

    pub fn get(&self, name: &str) -> Result<AgentInfo> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .agents
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("agent {name} not found"))
    }

    pub fn get_default(&self) -> Result<AgentInfo> {
        let name = {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            inner.default_agent.clone()
        };
        self.get(&name)
    }

    pub fn set_default(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if !inner.agents.contains_key(name) {
            bail!("agent {name} not found");
        }
        inner.default_agent = name.to_string();
        Ok(())
    }

    pub fn exists(&self, name: &str) -> bool {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.agents.contains_key(name)
    }

    pub fn count(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.agents.len()
    }

    pub fn list(&self, include_hidden: bool) -> Vec<AgentInfo> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut agents: Vec<AgentInfo> = inner
            .agents
            .values()
            .filter(|a| include_hidden || !a.hidden)
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        agents
    }

    pub fn list_by_mode(&self, mode: AgentMode, include_hidden: bool) -> Vec<AgentInfo> {
        self.list(include_hidden)
            .into_iter()
            .filter(|a| match mode {
                AgentMode::Primary => a.is_primary(),
                AgentMode::Subagent => a.is_subagent(),
                AgentMode::All => true,
            })
            .collect()
    }

    pub fn names(&self, include_hidden: bool) -> Vec<String> {
        self.list(include_hidden)
            .into_iter()
            .map(|a| a.name)
            .collect()
    }

    /// Clone-mutate-install: the update closure runs against a clone, so a
    /// failing update leaves the registered persona untouched.
    pub fn update<F>(&self, name: &str, update: F) -> Result<()>
    where
        F: FnOnce(&mut AgentInfo) -> Result<()>,
    {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let Some(current) = inner.agents.get(name) else {
            bail!("agent {name} not found");
        };

        let mut clone = current.clone();
        update(&mut clone)?;
        inner.agents.insert(name.to_string(), clone);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::{Action, Ruleset};

    fn registry_with(names: &[&str]) -> AgentRegistry {
        let registry = AgentRegistry::new();
        for name in names {
            registry.register(AgentInfo::new(*name)).unwrap();
        }
        registry
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = registry_with(&["build"]);
        let err = registry.register(AgentInfo::new("build")).unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn empty_name_rejected() {
        let registry = AgentRegistry::new();
        assert!(registry.register(AgentInfo::new("")).is_err());
    }

    #[test]
    fn get_returns_independent_clones() {
        let registry = registry_with(&["build"]);

        let mut copy = registry.get("build").unwrap();
        copy.system_prompt = "mutated".into();

        assert_eq!(registry.get("build").unwrap().system_prompt, "");
    }

    #[test]
    fn default_agent_is_build_until_changed() {
        let registry = registry_with(&["build", "plan"]);
        assert_eq!(registry.get_default().unwrap().name, "build");

        registry.set_default("plan").unwrap();
        assert_eq!(registry.get_default().unwrap().name, "plan");

        assert!(registry.set_default("missing").is_err());
    }

    #[test]
    fn list_filters_hidden() {
        let registry = AgentRegistry::new();
        registry.register(AgentInfo::new("visible")).unwrap();
        let mut hidden = AgentInfo::new("secret");
        hidden.hidden = true;
        registry.register(hidden).unwrap();

        assert_eq!(registry.names(false), vec!["visible"]);
        assert_eq!(registry.names(true), vec!["secret", "visible"]);
    }

    #[test]
    fn list_by_mode_honors_both_roles() {
        let registry = AgentRegistry::new();
        registry
            .register(AgentInfo::new("p").with_mode(AgentMode::Primary))
            .unwrap();
        registry
            .register(AgentInfo::new("s").with_mode(AgentMode::Subagent))
            .unwrap();
        registry
            .register(AgentInfo::new("b").with_mode(AgentMode::All))
            .unwrap();

        let subs = registry.list_by_mode(AgentMode::Subagent, true);
        let names: Vec<_> = subs.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["b", "s"]);
    }

    #[test]
    fn failed_update_leaves_agent_untouched() {
        let registry = registry_with(&["build"]);

        let err = registry.update("build", |info| {
            info.system_prompt = "halfway".into();
            anyhow::bail!("abort")
        });
        assert!(err.is_err());
        assert_eq!(registry.get("build").unwrap().system_prompt, "");

        registry
            .update("build", |info| {
                let mut ruleset = Ruleset::default_ask();
                ruleset.add_rule("read", "*", Action::Allow);
                info.permission = ruleset;
                Ok(())
            })
            .unwrap();
        assert_eq!(registry.get("build").unwrap().permission.rules.len(), 1);
    }
}
