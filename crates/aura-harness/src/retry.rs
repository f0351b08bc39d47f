//! Bounded jittered backoff, shared by the Workflow Runtime's per-node retry
//! policy and the Gatekeeper's backend-retry budget for transient Session &
//! Quota Store failures.

use aura_core::error::ErrorKind;
use std::time::Duration;
use tracing::debug;

/// `backoff = base * 2^attempt + jitter`, capped at `max_backoff`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            base,
            max_backoff,
        }
    }

    /// Backoff duration before retry attempt `attempt` (0-indexed: the
    /// delay before the *second* try is `backoff_for(0)`).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = 2u64.saturating_pow(attempt.min(32));
        let scaled = self.base.saturating_mul(exp as u32);
        let jitter = Duration::from_millis(jitter_ms(attempt));
        scaled.saturating_add(jitter).min(self.max_backoff)
    }

    /// Whether a node that has already made `attempts_made` attempts should
    /// retry, given the error's kind. Non-retryable kinds (everything but
    /// `Transient`) never retry regardless of budget.
    pub fn should_retry(&self, attempts_made: u32, kind: ErrorKind) -> bool {
        kind.is_retryable() && attempts_made < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100), Duration::from_secs(10))
    }
}

/// Deterministic pseudo-jitter derived from the attempt number rather than
/// a random source, so retry timing in tests is reproducible. Production
/// callers that need true jitter can add `rand` at the call site; this
/// keeps the harness dependency-free for randomness.
fn jitter_ms(attempt: u32) -> u64 {
    // A small triangular sequence capped at 50ms; avoids synchronized
    // thundering-herd retries without pulling in a RNG dependency.
    (attempt as u64 * 17) % 50
}

/// Runs `f` under `policy`, sleeping between attempts, until it succeeds or
/// the attempt budget is exhausted or the error kind is non-retryable.
/// Returns the last error if the budget is exhausted.
pub async fn run_with_retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    kind_of: impl Fn(&E) -> ErrorKind,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                let kind = kind_of(&e);
                if !policy.should_retry(attempt, kind) {
                    return Err(e);
                }
                let backoff = policy.backoff_for(attempt);
                debug!(attempt, ?backoff, "retrying after transient error");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}
