//! Retry and error classification utilities
//!
//! Provides exponential backoff for reads that hit a transient endpoint
//! failure, and maps raw provider error strings onto the relay taxonomy.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::RelayError;

/// Backoff configuration for transient failures
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first call
    pub max_retries: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate backoff duration for a given attempt (0-indexed)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let backoff_secs =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = backoff_secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Provider error categories the relay acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Log query span refused by the provider
    RangeTooLarge,
    /// RPC timeout, dropped connection, rate limiting
    Transient,
    /// The node or the contract refused the transaction
    Rejected,
    Unknown,
}

const RANGE_TOO_LARGE: &[&str] = &[
    "block range",
    "range too large",
    "query returned more than",
    "too many results",
    "response size exceeded",
    "exceed maximum block range",
];

const TRANSIENT: &[&str] = &[
    "timeout",
    "timed out",
    "connection",
    "network",
    "rate limit",
    "too many requests",
    "503",
    "502",
    "temporarily unavailable",
];

const REJECTED: &[&str] = &[
    "underpriced",
    "replacement transaction",
    "gas price too low",
    "max fee per gas less than",
    "nonce too low",
    "nonce too high",
    "already known",
    "reverted",
    "invalid signature",
    "insufficient funds",
    "out of gas",
];

/// Classify a provider error message
pub fn classify_error(error: &str) -> ErrorClass {
    let error = error.to_lowercase();
    let matches = |patterns: &[&str]| patterns.iter().any(|p| error.contains(p));

    // Some providers phrase range refusals as a "limit"; check them before
    // the rate-limit patterns.
    if matches(RANGE_TOO_LARGE) {
        ErrorClass::RangeTooLarge
    } else if matches(TRANSIENT) {
        ErrorClass::Transient
    } else if matches(REJECTED) {
        ErrorClass::Rejected
    } else {
        ErrorClass::Unknown
    }
}

/// Run `operation` until it succeeds, fails with a non-transient error, or
/// runs out of attempts.
pub async fn with_retry<F, T, Fut>(
    config: &RetryConfig,
    what: &str,
    mut operation: F,
) -> Result<T, RelayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RelayError>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && config.should_retry(attempt) => {
                let backoff = config.backoff_for_attempt(attempt);
                attempt += 1;
                warn!(
                    what,
                    attempt,
                    max = config.max_retries,
                    ?backoff,
                    error = %e,
                    "Retrying after backoff"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}
