//! Retry policy for model calls.

use hearth_core::{LlmError, RetryConfig};
use std::sync::Arc;
use std::time::Duration;

/// Exponential backoff capped at a ceiling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub ceiling: Duration,
    pub multiplier: f64,
}

impl ExponentialBackoff {
    /// Delay before retry number `attempt` (0 for the first retry).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay_ms = self.base.as_millis() as f64 * self.multiplier.powi(exponent);
        let ceiling_ms = self.ceiling.as_millis() as f64;
        if !delay_ms.is_finite() || delay_ms >= ceiling_ms {
            return self.ceiling;
        }
        Duration::from_millis(delay_ms as u64)
    }
}

type RetryPredicate = Arc<dyn Fn(&LlmError) -> bool + Send + Sync>;

/// When and how long to wait between attempts.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub backoff: ExponentialBackoff,
    retryable: RetryPredicate,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: ExponentialBackoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            retryable: Arc::new(LlmError::is_transient),
        }
    }

    /// Replace the retryable-error predicate.
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&LlmError) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(predicate);
        self
    }

    /// Single attempt, no waiting.
    pub fn no_retry() -> Self {
        Self::new(
            1,
            ExponentialBackoff {
                base: Duration::ZERO,
                ceiling: Duration::ZERO,
                multiplier: 1.0,
            },
        )
    }

    pub fn is_retryable(&self, error: &LlmError) -> bool {
        (self.retryable)(error)
    }

    /// Delay after failed attempt `attempt` (1-based), honouring a server hint.
    ///
    /// A `retry_after_ms` hint can lengthen the wait but never shorten it,
    /// and is itself capped at the backoff ceiling.
    pub fn delay_after(&self, attempt: u32, error: &LlmError) -> Duration {
        let computed = self.backoff.delay_for_attempt(attempt.saturating_sub(1));
        match error.retry_after_ms() {
            Some(hint) => computed.max(Duration::from_millis(hint).min(self.backoff.ceiling)),
            None => computed,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            ExponentialBackoff {
                base: config.initial_backoff,
                ceiling: config.max_backoff,
                multiplier: f64::from(config.backoff_multiplier),
            },
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .finish()
    }
}
