use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use super::error::SmbError;
use super::operation::SmbOperationError;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Bounded exponential backoff description.
///
/// Attempts are numbered from 1. Attempt `n` waits
/// `initial_delay * backoff_multiplier^(n-1)` before the next try, capped
/// at `max_delay`. A multiplier below 1.0 or not finite is treated as 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    // ---
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub exponential_backoff: bool,
}

// ---

impl RetryPolicy {
    // ---
    pub const DEFAULT: RetryPolicy = RetryPolicy::preset(3, 1_000, 30_000, 2.0, true);
    pub const AGGRESSIVE: RetryPolicy = RetryPolicy::preset(5, 500, 60_000, 1.5, true);
    pub const CONSERVATIVE: RetryPolicy = RetryPolicy::preset(2, 2_000, 10_000, 3.0, true);
    pub const NO_RETRY: RetryPolicy = RetryPolicy::preset(1, 0, 0, 1.0, false);

    // ---

    /// Build a policy, rejecting zero attempts, a multiplier that is not a
    /// finite value of at least 1.0, and an initial delay above the cap.
    pub fn new(
        max_attempts: u32,
        initial_delay_ms: u64,
        max_delay_ms: u64,
        backoff_multiplier: f64,
        exponential_backoff: bool,
    ) -> Result<Self, SmbError> {
        // ---
        if max_attempts == 0 {
            return Err(SmbError::InvalidArgument("max_attempts must be at least 1".into()));
        }
        if !backoff_multiplier.is_finite() || backoff_multiplier < 1.0 {
            return Err(SmbError::InvalidArgument(format!(
                "backoff multiplier must be a finite value >= 1.0, got {backoff_multiplier}"
            )));
        }
        if initial_delay_ms > max_delay_ms {
            return Err(SmbError::InvalidArgument(format!(
                "initial delay {initial_delay_ms}ms exceeds max delay {max_delay_ms}ms"
            )));
        }

        Ok(Self::preset(
            max_attempts,
            initial_delay_ms,
            max_delay_ms,
            backoff_multiplier,
            exponential_backoff,
        ))
    }

    const fn preset(
        max_attempts: u32,
        initial_delay_ms: u64,
        max_delay_ms: u64,
        backoff_multiplier: f64,
        exponential_backoff: bool,
    ) -> Self {
        // ---
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(initial_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
            backoff_multiplier,
            exponential_backoff,
        }
    }

    // ---

    /// Whether `err`, having failed on attempt `attempt`, deserves another try.
    ///
    /// No once `attempt` reaches `max_attempts`, when the error is not
    /// retryable, or once the operation has been running longer than
    /// `max_delay * max_attempts`.
    pub fn should_retry(&self, err: &SmbOperationError, attempt: u32) -> bool {
        // ---
        if attempt >= self.max_attempts || !err.is_retryable() {
            return false;
        }

        if err.elapsed() > self.max_delay.saturating_mul(self.max_attempts) {
            tracing::debug!(code = %err.code(), "retry time limit exceeded for operation");
            return false;
        }

        true
    }

    // ---

    /// Delay to wait after attempt `attempt` fails.
    pub fn delay(&self, attempt: u32) -> Duration {
        // ---
        if !self.exponential_backoff {
            return self.initial_delay;
        }

        let multiplier = match self.backoff_multiplier {
            m if m.is_finite() && m >= 1.0 => m,
            _ => 1.0,
        };

        let mut delay = self.initial_delay;
        for _ in 1..attempt {
            if delay >= self.max_delay {
                break;
            }
            delay = Duration::try_from_secs_f64(delay.as_secs_f64() * multiplier).unwrap_or(self.max_delay);
        }
        delay.min(self.max_delay)
    }
}

// ---

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

// ---------------------------------------------------------------------------
// retry_operation
// ---------------------------------------------------------------------------

/// Drive `op` until it succeeds or its error's own policy gives up.
///
/// `op` receives the attempt number (starting at 1). The error returned
/// on give-up is stamped with the final attempt number.
pub async fn retry_operation<T, F, Fut>(mut op: F) -> Result<T, SmbOperationError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, SmbOperationError>>,
{
    // ---
    let started = Instant::now();
    let mut attempt = 1;

    loop {
        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => e.for_retry(attempt).started_at(started),
        };

        if !err.should_retry(attempt) {
            tracing::debug!(%err, attempt, "giving up");
            return Err(err);
        }

        let delay = err.retry_delay(attempt);
        tracing::warn!(
            %err,
            attempt,
            max_attempts = err.policy().max_attempts,
            "retrying in {}ms",
            delay.as_millis()
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

// ---
