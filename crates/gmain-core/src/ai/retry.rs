//! Retry governor for upstream API failures.
//!
//! Drives up to three attempts with exponential backoff, honoring server
//! `Retry-After` hints when a response is available. Used around request
//! initiation only — an active stream is never re-driven.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use reqwest::header::HeaderMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Cancelled;

/// Maximum attempts per request (first try included).
pub const MAX_ATTEMPTS: usize = 3;

/// First backoff step.
pub const INITIAL_DELAY: Duration = Duration::from_millis(500);

/// Multiplier applied per attempt.
pub const BACKOFF_FACTOR: f64 = 2.0;

/// Delay cap when the failing attempt produced a response (headers available).
pub const MAX_DELAY_WITH_RESPONSE: Duration = Duration::from_secs(10);

/// Delay cap when the failure was transport-level (no headers).
pub const MAX_DELAY_NO_RESPONSE: Duration = Duration::from_secs(2);

const TRANSIENT_PATTERNS: &[&str] = &[
    "connection reset",
    "connection refused",
    "timeout",
    "timed out",
    "broken pipe",
    "eof",
    "temporary failure",
    "no route to host",
    "overloaded",
    "rate limit",
    "too many requests",
    "service unavailable",
    "bad gateway",
    "gateway timeout",
];

/// True when an error message matches a known transient pattern.
pub fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p))
}

/// True for 5xx, 408 and 429.
pub fn is_retryable_status(status: u16) -> bool {
    (500..600).contains(&status) || status == 408 || status == 429
}

/// Parse `Retry-After-Ms` (integer milliseconds) or `Retry-After`
/// (seconds as float, or an HTTP-date) from response headers.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    if let Some(ms) = headers
        .get("retry-after-ms")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
    {
        if ms > 0 {
            return Some(Duration::from_millis(ms));
        }
    }

    let value = headers.get("retry-after")?.to_str().ok()?;

    if let Ok(seconds) = value.parse::<f64>() {
        if seconds > 0.0 {
            return Some(Duration::from_secs_f64(seconds));
        }
        return None;
    }

    if let Ok(when) = chrono::DateTime::parse_from_rfc2822(value) {
        let delay = when.signed_duration_since(chrono::Utc::now());
        if let Ok(delay) = delay.to_std() {
            return Some(delay);
        }
    }

    None
}

/// Compute the wait before the next attempt.
///
/// Priority: server hint from headers, then exponential backoff
/// `INITIAL_DELAY * BACKOFF_FACTOR^(attempt-1)`. The cap depends on whether
/// the failing attempt produced a response at all.
pub fn backoff_delay(attempt: usize, headers: Option<&HeaderMap>) -> Duration {
    let cap = if headers.is_some() {
        MAX_DELAY_WITH_RESPONSE
    } else {
        MAX_DELAY_NO_RESPONSE
    };

    if let Some(hint) = headers.and_then(parse_retry_after) {
        return hint.min(MAX_DELAY_WITH_RESPONSE);
    }

    let exponent = attempt.saturating_sub(1) as f64;
    let delay = INITIAL_DELAY.mul_f64(BACKOFF_FACTOR.powf(exponent));
    delay.min(cap)
}

/// Bounded-retry driver.
#[derive(Debug, Clone)]
pub struct Retrier {
    max_attempts: usize,
}

impl Default for Retrier {
    fn default() -> Self {
        Self::new()
    }
}

impl Retrier {
    pub fn new() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Run `attempt` until it succeeds, fails terminally, or attempts run out.
    ///
    /// Success is a response with status < 400, returned as-is. A response
    /// with a retryable status (5xx/408/429) schedules a wait and another
    /// attempt; any other status is handed back to the caller unchanged so
    /// the error body can be read. Transport errors are retried when their
    /// message matches a transient pattern. The wait is preemptible: if
    /// `cancel` fires, the cancellation reason is returned with no further
    /// attempts.
    pub async fn execute<F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> Result<reqwest::Response>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<reqwest::Response>>,
    {
        for n in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                return Err(Cancelled.into());
            }

            let delay = match attempt().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if status < 400 || !is_retryable_status(status) || n == self.max_attempts {
                        return Ok(resp);
                    }

                    let delay = backoff_delay(n, Some(resp.headers()));
                    warn!(
                        attempt = n,
                        status,
                        delay_ms = delay.as_millis() as u64,
                        "retryable response, backing off"
                    );
                    delay
                }
                Err(err) => {
                    if !is_retryable_message(&format!("{err:#}")) || n == self.max_attempts {
                        return Err(err);
                    }

                    let delay = backoff_delay(n, None);
                    warn!(
                        attempt = n,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "retryable error, backing off"
                    );
                    delay
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => return Err(Cancelled.into()),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        debug!("retry budget exhausted");
        Err(anyhow::anyhow!("retry budget exhausted"))
    }
}
