//! Token bookkeeping for context budget enforcement.

/// Token usage counted against the context window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input: usize,
    pub output: usize,
    pub cache_read: usize,
}

impl TokenUsage {
    /// Tokens counted as "used": input + cache reads + output.
    pub fn used(&self) -> usize {
        self.input + self.cache_read + self.output
    }
}

/// Model context/output limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelLimits {
    pub context_limit: usize,
    pub output_limit: usize,
}

impl Default for ModelLimits {
    fn default() -> Self {
        Self {
            context_limit: 200_000,
            output_limit: 8_192,
        }
    }
}

impl ModelLimits {
    /// Tokens available for history: context window minus the output budget.
    pub fn available(&self) -> usize {
        self.context_limit.saturating_sub(self.output_limit)
    }
}

/// Compaction threshold: used > 80% of available.
pub fn needs_compaction(usage: TokenUsage, limits: ModelLimits) -> bool {
    (usage.used() as f64) > (limits.available() as f64) * 0.8
}

/// Hard overflow: used > available.
pub fn is_overflow(usage: TokenUsage, limits: ModelLimits) -> bool {
    usage.used() > limits.available()
}

/// Used-vs-available ratio as a percentage.
pub fn usage_percentage(usage: TokenUsage, limits: ModelLimits) -> f64 {
    let available = limits.available();
    if available == 0 {
        return 0.0;
    }
    (usage.used() as f64 / available as f64) * 100.0
}
