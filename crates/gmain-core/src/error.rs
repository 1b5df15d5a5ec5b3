//! Cross-cutting error markers.

use std::fmt;

/// Cooperative cancellation marker. Propagated up unchanged: no retries are
/// attempted and no events are emitted beyond what the handler already saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// True when `err` is (or wraps) a cancellation marker.
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.chain().any(|e| e.is::<Cancelled>())
}
