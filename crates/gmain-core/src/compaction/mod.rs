//! Context compaction: output truncation, tool-result pruning and
//! summarization via a nested LLM call.
//!
//! Ordering policy: pruning first (cheap, local), summarization when
//! pruning did not free enough.

pub mod limits;
pub mod pruning;
pub mod summarize;
pub mod truncate;

pub use limits::{is_overflow, needs_compaction, usage_percentage, ModelLimits, TokenUsage};
pub use pruning::{can_prune, prune, PruneResult};
pub use summarize::{CompactInput, CompactResult, Compactor};
pub use truncate::{truncate_output, TruncateResult, MAX_OUTPUT_LEN};
