//! Rule evaluation and session-scoped approval.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::rule::{Action, RejectedError, Ruleset};

/// Pure rule evaluation: depends only on its arguments.
///
/// `allow_all` and `deny_all` short-circuit; otherwise the first rule whose
/// permission matches (exactly or `"*"`) and whose glob pattern matches
/// wins. Invalid glob patterns are treated as non-matching. No match falls
/// back to `Ask` regardless of `default_ask`, which only documents intent.
pub fn evaluate(permission: &str, pattern: &str, ruleset: &Ruleset) -> Action {
    if ruleset.allow_all {
        return Action::Allow;
    }
    if ruleset.deny_all {
        return Action::Deny;
    }

    for rule in &ruleset.rules {
        if rule.permission != permission && rule.permission != "*" {
            continue;
        }

        let Ok(glob) = globset::Glob::new(&rule.pattern) else {
            continue;
        };
        if glob.compile_matcher().is_match(pattern) {
            return rule.action;
        }
    }

    Action::Ask
}

/// A request escalated to the user.
#[derive(Debug, Clone)]
pub struct AskRequest {
    pub permission: String,
    pub pattern: String,
    pub message: String,
}

/// The user's answer. `always` records a session-wide approval.
#[derive(Debug, Clone, Copy, Default)]
pub struct AskResponse {
    pub approved: bool,
    pub rejected: bool,
    pub always: bool,
}

/// Channel to the user for `Ask`-action escalation. Blocking on the answer
/// is a suspension point and must respect the caller's cancellation.
#[async_trait]
pub trait PermissionPrompt: Send + Sync {
    async fn ask(&self, request: AskRequest) -> anyhow::Result<AskResponse>;
}

/// Input to [`Evaluator::ask`].
pub struct AskInput<'a> {
    pub session_id: &'a str,
    pub permission: &'a str,
    pub pattern: &'a str,
    pub ruleset: &'a Ruleset,
    pub message: String,
    pub prompt: Option<Arc<dyn PermissionPrompt>>,
}

/// Permission evaluator with session-scoped "always allow" memory.
#[derive(Default)]
pub struct Evaluator {
    // session id -> set of "permission:pattern" keys
    approvals: RwLock<HashMap<String, HashSet<String>>>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide a request, escalating to the user when the rules say ask.
    ///
    /// Returns `Ok(())` for allowed requests, `Err(RejectedError)` otherwise.
    /// An `Ask` action with no prompt available is a rejection.
    pub async fn ask(&self, input: AskInput<'_>) -> Result<(), RejectedError> {
        if self.has_approval(input.session_id, input.permission, input.pattern) {
            return Ok(());
        }

        match evaluate(input.permission, input.pattern, input.ruleset) {
            Action::Allow => Ok(()),

            Action::Deny => Err(RejectedError::new(
                input.permission,
                input.pattern,
                format!("Permission denied: {} {}", input.permission, input.pattern),
            )),

            Action::Ask => {
                let Some(prompt) = input.prompt else {
                    return Err(RejectedError::new(
                        input.permission,
                        input.pattern,
                        "Permission required but no ask channel available",
                    ));
                };

                let response = prompt
                    .ask(AskRequest {
                        permission: input.permission.to_string(),
                        pattern: input.pattern.to_string(),
                        message: input.message,
                    })
                    .await
                    .map_err(|err| {
                        RejectedError::new(input.permission, input.pattern, err.to_string())
                    })?;

                if response.rejected || !response.approved {
                    return Err(RejectedError::new(
                        input.permission,
                        input.pattern,
                        "User rejected permission request",
                    ));
                }

                if response.always {
                    self.add_approval(input.session_id, input.permission, input.pattern);
                }

                Ok(())
            }
        }
    }

    pub fn has_approval(&self, session_id: &str, permission: &str, pattern: &str) -> bool {
        let approvals = self.approvals.read().unwrap_or_else(|e| e.into_inner());
        approvals
            .get(session_id)
            .is_some_and(|set| set.contains(&approval_key(permission, pattern)))
    }

    fn add_approval(&self, session_id: &str, permission: &str, pattern: &str) {
        let mut approvals = self.approvals.write().unwrap_or_else(|e| e.into_inner());
        approvals
            .entry(session_id.to_string())
            .or_default()
            .insert(approval_key(permission, pattern));
    }

    /// Drop every approval recorded for a session.
    pub fn clear_session(&self, session_id: &str) {
        let mut approvals = self.approvals.write().unwrap_or_else(|e| e.into_inner());
        approvals.remove(session_id);
    }

    /// Copy of a session's approvals, for display.
    pub fn session_approvals(&self, session_id: &str) -> HashSet<String> {
        let approvals = self.approvals.read().unwrap_or_else(|e| e.into_inner());
        approvals.get(session_id).cloned().unwrap_or_default()
    }
}

fn approval_key(permission: &str, pattern: &str) -> String {
    format!("{permission}:{pattern}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ruleset(rules: &[(&str, &str, Action)]) -> Ruleset {
        let mut set = Ruleset::default();
        for (permission, pattern, action) in rules {
            set.add_rule(*permission, *pattern, *action);
        }
        set
    }

    #[test]
    fn first_matching_rule_wins() {
        let set = ruleset(&[
            ("edit", ".gmain-agent/plans/*", Action::Allow),
            ("edit", "*", Action::Deny),
        ]);

        assert_eq!(
            evaluate("edit", ".gmain-agent/plans/phase1.md", &set),
            Action::Allow
        );
        assert_eq!(evaluate("edit", "src/main.rs", &set), Action::Deny);
    }

    #[test]
    fn wildcard_permission_matches_any_tool() {
        let set = ruleset(&[("*", "*", Action::Deny)]);
        assert_eq!(evaluate("bash", "ls", &set), Action::Deny);
        assert_eq!(evaluate("read", "/x", &set), Action::Deny);
    }

    #[test]
    fn global_flags_short_circuit() {
        assert_eq!(evaluate("bash", "rm -rf /", &Ruleset::allow_all()), Action::Allow);
        assert_eq!(evaluate("read", "/etc/hosts", &Ruleset::deny_all()), Action::Deny);
    }

    #[test]
    fn no_match_falls_back_to_ask() {
        let set = ruleset(&[("read", "*", Action::Allow)]);
        assert_eq!(evaluate("bash", "ls", &set), Action::Ask);

        // default_ask documents intent but does not change the fallback
        let mut documented = set.clone();
        documented.default_ask = true;
        assert_eq!(evaluate("bash", "ls", &documented), Action::Ask);
    }

    #[test]
    fn invalid_pattern_does_not_match() {
        let set = ruleset(&[("read", "[", Action::Deny), ("read", "*", Action::Allow)]);
        assert_eq!(evaluate("read", "/a", &set), Action::Allow);
    }

    struct ScriptedPrompt {
        response: AskResponse,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PermissionPrompt for ScriptedPrompt {
        async fn ask(&self, _request: AskRequest) -> anyhow::Result<AskResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response)
        }
    }

    fn input<'a>(
        session: &'a str,
        permission: &'a str,
        pattern: &'a str,
        ruleset: &'a Ruleset,
        prompt: Option<Arc<dyn PermissionPrompt>>,
    ) -> AskInput<'a> {
        AskInput {
            session_id: session,
            permission,
            pattern,
            ruleset,
            message: String::new(),
            prompt,
        }
    }

    #[tokio::test]
    async fn ask_without_prompt_is_rejected() {
        let evaluator = Evaluator::new();
        let set = Ruleset::default_ask();

        let err = evaluator
            .ask(input("s1", "bash", "ls", &set, None))
            .await
            .unwrap_err();
        assert!(err.message.contains("no ask channel"));
    }

    #[tokio::test]
    async fn always_approval_skips_future_prompts() {
        let evaluator = Evaluator::new();
        let set = Ruleset::default_ask();
        let prompt = Arc::new(ScriptedPrompt {
            response: AskResponse {
                approved: true,
                rejected: false,
                always: true,
            },
            calls: AtomicUsize::new(0),
        });

        evaluator
            .ask(input("s1", "bash", "cargo build", &set, Some(prompt.clone())))
            .await
            .unwrap();
        assert_eq!(prompt.calls.load(Ordering::SeqCst), 1);

        // Second ask answers from the approvals set without the prompt.
        evaluator
            .ask(input("s1", "bash", "cargo build", &set, Some(prompt.clone())))
            .await
            .unwrap();
        assert_eq!(prompt.calls.load(Ordering::SeqCst), 1);

        // Other sessions are unaffected.
        assert!(!evaluator.has_approval("s2", "bash", "cargo build"));
    }

    #[tokio::test]
    async fn plain_approval_is_not_recorded() {
        let evaluator = Evaluator::new();
        let set = Ruleset::default_ask();
        let prompt = Arc::new(ScriptedPrompt {
            response: AskResponse {
                approved: true,
                rejected: false,
                always: false,
            },
            calls: AtomicUsize::new(0),
        });

        evaluator
            .ask(input("s1", "bash", "ls", &set, Some(prompt.clone())))
            .await
            .unwrap();
        evaluator
            .ask(input("s1", "bash", "ls", &set, Some(prompt.clone())))
            .await
            .unwrap();
        assert_eq!(prompt.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn user_rejection_is_a_denial() {
        let evaluator = Evaluator::new();
        let set = Ruleset::default_ask();
        let prompt = Arc::new(ScriptedPrompt {
            response: AskResponse {
                approved: false,
                rejected: true,
                always: false,
            },
            calls: AtomicUsize::new(0),
        });

        let err = evaluator
            .ask(input("s1", "bash", "rm -rf /", &set, Some(prompt)))
            .await
            .unwrap_err();
        assert!(err.message.contains("rejected"));
    }

    #[tokio::test]
    async fn clear_session_forgets_approvals() {
        let evaluator = Evaluator::new();
        let set = Ruleset::default_ask();
        let prompt = Arc::new(ScriptedPrompt {
            response: AskResponse {
                approved: true,
                rejected: false,
                always: true,
            },
            calls: AtomicUsize::new(0),
        });

        evaluator
            .ask(input("s1", "bash", "ls", &set, Some(prompt)))
            .await
            .unwrap();
        assert!(evaluator.has_approval("s1", "bash", "ls"));

        evaluator.clear_session("s1");
        assert!(!evaluator.has_approval("s1", "bash", "ls"));
    }
}
