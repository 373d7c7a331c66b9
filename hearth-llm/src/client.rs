//! Retrying, rate-aware model client shared by the pipeline components.

use crate::{GenerationRequest, GenerationResponse, LanguageModel, RetryPolicy, UsageTracker};
use hearth_core::{HearthError, HearthResult, LlmError, PipelineConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Wraps a [`LanguageModel`] with bounded concurrency, per-attempt timeouts
/// and retry with exponential backoff.
///
/// Cloning is cheap; clones share the semaphore and usage counters.
#[derive(Clone)]
pub struct ModelClient {
    model: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
    timeout: Duration,
    permits: Arc<Semaphore>,
    usage: Arc<UsageTracker>,
}

impl ModelClient {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        retry: RetryPolicy,
        timeout: Duration,
        max_concurrent_calls: usize,
    ) -> Self {
        Self {
            model,
            retry,
            timeout,
            permits: Arc::new(Semaphore::new(max_concurrent_calls.max(1))),
            usage: Arc::new(UsageTracker::new()),
        }
    }

    /// Build a client from the pipeline configuration.
    pub fn from_config(model: Arc<dyn LanguageModel>, config: &PipelineConfig) -> Self {
        Self::new(
            model,
            RetryPolicy::from(&config.retry),
            config.request_timeout,
            config.max_concurrent_model_calls,
        )
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    /// Run a generation, retrying transient failures.
    ///
    /// Non-retryable errors are returned as-is after the first attempt. When
    /// every attempt fails with a retryable error the result is
    /// `LlmError::RetriesExhausted` carrying the last cause.
    pub async fn generate(&self, request: &GenerationRequest) -> HearthResult<GenerationResponse> {
        let max_attempts = self.retry.max_attempts;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let error = match self.attempt(request).await {
                Ok(response) => {
                    self.usage.record(&response.usage);
                    tracing::debug!(
                        model = %response.model,
                        attempt,
                        prompt_tokens = response.usage.prompt_tokens,
                        completion_tokens = response.usage.completion_tokens,
                        "Model call succeeded"
                    );
                    return Ok(response);
                }
                Err(HearthError::Llm(e)) => e,
                Err(other) => return Err(other),
            };
            self.usage.record_failure();

            if !self.retry.is_retryable(&error) {
                tracing::warn!(
                    model = %self.model.model_id(),
                    attempt,
                    error = %error,
                    "Model call failed with non-retryable error"
                );
                return Err(HearthError::Llm(error));
            }

            if attempt >= max_attempts {
                tracing::warn!(
                    model = %self.model.model_id(),
                    attempts = attempt,
                    error = %error,
                    "Model call retries exhausted"
                );
                return Err(HearthError::Llm(LlmError::RetriesExhausted {
                    attempts: attempt,
                    last_error: error.to_string(),
                }));
            }

            let delay = self.retry.delay_after(attempt, &error);
            tracing::warn!(
                model = %self.model.model_id(),
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Model call failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// One attempt: acquire a permit, then call the provider under the timeout.
    async fn attempt(&self, request: &GenerationRequest) -> HearthResult<GenerationResponse> {
        let _permit = self.permits.acquire().await.map_err(|e| {
            HearthError::Llm(LlmError::RequestFailed {
                provider: self.model.model_id().to_string(),
                status: 0,
                message: format!("Concurrency limiter closed: {}", e),
            })
        })?;

        let started = Instant::now();
        match tokio::time::timeout(self.timeout, self.model.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(HearthError::Llm(LlmError::Timeout {
                provider: self.model.model_id().to_string(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            })),
        }
    }
}

impl std::fmt::Debug for ModelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelClient")
            .field("model", &self.model.model_id())
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .field("available_permits", &self.permits.available_permits())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExponentialBackoff, MockLanguageModel};
    use hearth_core::GenerationProfile;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            ExponentialBackoff {
                base: Duration::from_millis(1),
                ceiling: Duration::from_millis(5),
                multiplier: 2.0,
            },
        )
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new(
            GenerationProfile {
                temperature: 0.7,
                max_tokens: 200,
            },
            "describe",
            "pattern",
        )
    }

    fn server_error() -> LlmError {
        LlmError::RequestFailed {
            provider: "mock".to_string(),
            status: 503,
            message: "overloaded".to_string(),
        }
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let mock = Arc::new(
            MockLanguageModel::new()
                .then_error(server_error())
                .then_text("Turns on the light."),
        );
        let client = ModelClient::new(mock.clone(), fast_policy(3), Duration::from_secs(1), 2);

        let response = client.generate(&request()).await.unwrap();
        assert_eq!(response.text, "Turns on the light.");
        assert_eq!(mock.call_count(), 2);
        assert_eq!(client.usage().calls(), 1);
        assert_eq!(client.usage().failures(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_carry_last_cause() {
        let mock = Arc::new(
            MockLanguageModel::new()
                .then_error(server_error())
                .then_error(server_error())
                .then_error(server_error()),
        );
        let client = ModelClient::new(mock.clone(), fast_policy(3), Duration::from_secs(1), 2);

        let err = client.generate(&request()).await.unwrap_err();
        match err {
            HearthError::Llm(LlmError::RetriesExhausted {
                attempts,
                last_error,
            }) => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("503"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let mock = Arc::new(MockLanguageModel::new().then_error(LlmError::RequestFailed {
            provider: "mock".to_string(),
            status: 401,
            message: "invalid api key".to_string(),
        }));
        let client = ModelClient::new(mock.clone(), fast_policy(3), Duration::from_secs(1), 2);

        let err = client.generate(&request()).await.unwrap_err();
        assert!(matches!(
            err,
            HearthError::Llm(LlmError::RequestFailed { status: 401, .. })
        ));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_treated_as_transient() {
        let mock = Arc::new(
            MockLanguageModel::new()
                .with_latency(Duration::from_millis(200))
                .then_text("too slow"),
        );
        let client = ModelClient::new(mock.clone(), fast_policy(2), Duration::from_millis(20), 1);

        let err = client.generate(&request()).await.unwrap_err();
        match err {
            HearthError::Llm(LlmError::RetriesExhausted { attempts, last_error }) => {
                assert_eq!(attempts, 2);
                assert!(last_error.contains("timed out"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
