//! Retry policy (§7, §8, §9).
//!
//! The source's escalation ladder applied its failure-retry budget
//! inconsistently across tiers; per the open-question resolution in §9,
//! this implementation makes it a single configuration value rather than a
//! multi-tier escalation state machine: a Step may be retried by the Wave
//! Scheduler under Autonomous mode until `Step.Attempts` would exceed
//! `MAX_ATTEMPTS` (3 total, i.e. the initial attempt plus 2 retries).
//!
//! This also carries the jittered-backoff helper for LLM-transient errors
//! (§7: "Retry up to 2x with jitter inside the provider wrapper").

use std::time::Duration;

/// Total attempts (including the first) permitted for one Step under
/// Autonomous-retry policy (§8 "Attempt accounting").
pub const MAX_STEP_ATTEMPTS: u32 = 3;

pub fn step_retry_exhausted(attempts: u32) -> bool {
    attempts >= MAX_STEP_ATTEMPTS
}

/// Base backoff for LLM-transient retries (timeouts, 5xx). Two retries,
/// exponential with jitter, matching §7's "retry up to 2x with jitter".
pub struct LlmRetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for LlmRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl LlmRetryPolicy {
    /// Delay before the `attempt`-th retry (1-indexed), exponential with up
    /// to 25% jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_millis() as u64 * 2u64.saturating_pow(attempt.saturating_sub(1));
        let jitter = (exp as f64 * 0.25 * pseudo_jitter(attempt)) as u64;
        Duration::from_millis(exp + jitter)
    }

    /// Whether `message` looks like a transient provider failure worth
    /// retrying, vs. a hard failure that should surface immediately.
    pub fn is_transient(message: &str) -> bool {
        let lower = message.to_ascii_lowercase();
        ["timeout", "timed out", "502", "503", "429", "connection", "temporarily unavailable"]
            .iter()
            .any(|needle| lower.contains(needle))
    }
}

/// Deterministic stand-in for jitter so retry delays stay reproducible in
/// tests; varies by attempt number rather than wall-clock randomness.
fn pseudo_jitter(attempt: u32) -> f64 {
    match attempt % 3 {
        0 => 0.1,
        1 => 0.6,
        _ => 0.9,
    }
}
