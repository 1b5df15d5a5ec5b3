//! Repeat-call detection.
//!
//! Flags identical (tool, arguments) invocations once they reach a
//! threshold within a session, to catch models stuck re-issuing the same
//! call. Arguments are fingerprinted by the first 8 bytes of a SHA-256 over
//! their canonical JSON.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Identical calls at or past this count trip the detector.
pub const REPEAT_THRESHOLD: usize = 3;

/// History older than this is swept wholesale.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug)]
struct State {
    // session -> tool -> arg hash -> count
    history: HashMap<String, HashMap<String, HashMap<String, usize>>>,
    last_sweep: Instant,
}

/// Per-process detector, shared across loops in a session.
#[derive(Debug)]
pub struct RepeatCallDetector {
    state: Mutex<State>,
}

impl Default for RepeatCallDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl RepeatCallDetector {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                history: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    /// Record one invocation and report whether the threshold is reached.
    pub fn check(&self, session_id: &str, tool: &str, args: &Value) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if state.last_sweep.elapsed() > SWEEP_INTERVAL {
            state.history.clear();
            state.last_sweep = Instant::now();
        }

        let hash = hash_args(args);
        let count = state
            .history
            .entry(session_id.to_string())
            .or_default()
            .entry(tool.to_string())
            .or_default()
            .entry(hash)
            .or_insert(0);
        *count += 1;

        *count >= REPEAT_THRESHOLD
    }

    /// Current count without incrementing.
    pub fn count(&self, session_id: &str, tool: &str, args: &Value) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .history
            .get(session_id)
            .and_then(|tools| tools.get(tool))
            .and_then(|hashes| hashes.get(&hash_args(args)))
            .copied()
            .unwrap_or(0)
    }

    /// Clear counts for one tool, used after the user confirms continuation.
    pub fn reset_tool(&self, session_id: &str, tool: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tools) = state.history.get_mut(session_id) {
            tools.remove(tool);
        }
    }

    /// Clear a session's whole history.
    pub fn reset(&self, session_id: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.history.remove(session_id);
    }
}

fn hash_args(args: &Value) -> String {
    let bytes = serde_json::to_vec(args).unwrap_or_else(|_| args.to_string().into_bytes());
    let digest = Sha256::digest(&bytes);
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}
