use crate::config::types::RetryConfig;
use crate::ingest::error::ErrorKind;
use std::time::Duration;

/// Failures seen so far while delivering one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Attempt {
    pub transient_failures: u32,
    pub auth_refreshes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep, then resend the same batch
    RetryAfter(Duration),
    /// Force a scoped token refresh, then resend immediately
    RefreshAndRetry,
    /// Give up on this batch and keep ingesting
    DropBatch,
    /// Stop ingestion
    Abort,
}

/// Per-batch retry rules: exponential backoff for transient failures, one
/// token refresh per batch, drop on malformed input, abort on fatal errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Decide what to do about the failure that just happened. `attempt`
    /// counts the failures before it.
    pub fn decide(&self, attempt: &Attempt, kind: ErrorKind) -> RetryDecision {
        match kind {
            ErrorKind::Fatal => RetryDecision::Abort,
            ErrorKind::MalformedBatch => RetryDecision::DropBatch,
            ErrorKind::AuthExpired if attempt.auth_refreshes == 0 => RetryDecision::RefreshAndRetry,
            // A refreshed token rejected again is treated like any transient failure
            ErrorKind::AuthExpired | ErrorKind::Transient => {
                if attempt.transient_failures + 1 >= self.max_attempts {
                    RetryDecision::DropBatch
                } else {
                    RetryDecision::RetryAfter(self.backoff(attempt.transient_failures))
                }
            }
        }
    }

    /// base * 2^n, capped at max_delay
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.base_delay, config.max_delay, config.max_attempts)
    }
}
