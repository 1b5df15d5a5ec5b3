//! Permission evaluation: rule matching, user escalation and repeat-call
//! protection.

pub mod evaluator;
pub mod repeat;
pub mod rule;

pub use evaluator::{evaluate, AskInput, AskRequest, AskResponse, Evaluator, PermissionPrompt};
pub use repeat::RepeatCallDetector;
pub use rule::{Action, RejectedError, Rule, Ruleset};
