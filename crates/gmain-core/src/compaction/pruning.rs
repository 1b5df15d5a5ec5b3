//! Tool-result pruning.
//!
//! Replaces old tool_result bodies with a placeholder to free context,
//! protecting the most recent messages and tools whose historical output is
//! semantically load-bearing. Protection is keyed on the originating
//! `tool_use.name`, found by cross-referencing `tool_use_id`.

use std::collections::HashMap;

use chrono::Utc;

use crate::ai::types::{ContentBlock, Message, Role};

/// Number of recent conversation turns kept intact (message window is
/// `2 × PROTECT_RECENT`).
pub const PROTECT_RECENT: usize = 2;

/// Stop pruning once this many chars have been freed.
pub const PRUNE_MINIMUM: usize = 20_000;

/// Body substituted for pruned results.
pub const PRUNE_PLACEHOLDER: &str = "[Output pruned to save context]";

/// Tools whose results are never pruned.
pub const PROTECTED_TOOLS: &[&str] = &["skill", "plan_exit", "plan_enter"];

/// Outcome of a pruning pass.
#[derive(Debug, Clone)]
pub struct PruneResult {
    pub pruned_count: usize,
    pub pruned_chars: usize,
    pub messages: Vec<Message>,
}

/// Pruning needs at least the protected window present.
pub fn can_prune(messages: &[Message]) -> bool {
    messages.len() >= PROTECT_RECENT * 2
}

/// Walk messages old → new, replacing unpruned tool_result bodies with the
/// placeholder until [`PRUNE_MINIMUM`] chars are freed. The last
/// `2 × PROTECT_RECENT` messages are never touched.
pub fn prune(messages: &[Message]) -> PruneResult {
    if !can_prune(messages) {
        return PruneResult {
            pruned_count: 0,
            pruned_chars: 0,
            messages: messages.to_vec(),
        };
    }

    let tool_names = tool_names_by_id(messages);
    let protect_from = messages.len() - PROTECT_RECENT * 2;

    let mut result = messages.to_vec();
    let mut pruned_count = 0;
    let mut pruned_chars = 0;

    'walk: for message in &mut result[..protect_from] {
        // tool_result blocks only appear in user messages
        if message.role != Role::User {
            continue;
        }

        for block in &mut message.content {
            let ContentBlock::ToolResult {
                tool_use_id,
                content,
                pruned,
                pruned_at,
                ..
            } = block
            else {
                continue;
            };

            if *pruned || content.is_empty() {
                continue;
            }
            if tool_names
                .get(tool_use_id.as_str())
                .is_some_and(|name| PROTECTED_TOOLS.contains(name))
            {
                continue;
            }

            pruned_chars += content.len();
            pruned_count += 1;
            *content = PRUNE_PLACEHOLDER.to_string();
            *pruned = true;
            *pruned_at = Some(Utc::now());

            if pruned_chars >= PRUNE_MINIMUM {
                break 'walk;
            }
        }
    }

    PruneResult {
        pruned_count,
        pruned_chars,
        messages: result,
    }
}

/// Total prunable chars, for deciding whether pruning is worth attempting.
pub fn prunable_chars(messages: &[Message]) -> usize {
    if !can_prune(messages) {
        return 0;
    }

    let tool_names = tool_names_by_id(messages);
    let protect_from = messages.len() - PROTECT_RECENT * 2;

    messages[..protect_from]
        .iter()
        .filter(|m| m.role == Role::User)
        .flat_map(|m| &m.content)
        .filter_map(|block| match block {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                pruned: false,
                ..
            } if !tool_names
                .get(tool_use_id.as_str())
                .is_some_and(|name| PROTECTED_TOOLS.contains(name)) =>
            {
                Some(content.len())
            }
            _ => None,
        })
        .sum()
}

fn tool_names_by_id(messages: &[Message]) -> HashMap<&str, &str> {
    messages
        .iter()
        .flat_map(|m| &m.content)
        .filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, .. } => Some((id.as_str(), name.as_str())),
            _ => None,
        })
        .collect()
}
