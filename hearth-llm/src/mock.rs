//! Scripted language model for tests.

use crate::{GenerationRequest, GenerationResponse, LanguageModel, TokenUsage};
use async_trait::async_trait;
use hearth_core::{HearthError, HearthResult, LlmError};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

const MOCK_PROVIDER: &str = "mock";

/// Mock language model for testing.
/// Replays a queue of scripted responses and records every request.
#[derive(Debug, Default)]
pub struct MockLanguageModel {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    /// Returned once the script is exhausted
    fallback: Option<String>,
    latency: Option<Duration>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl MockLanguageModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock that answers every call with `text`.
    pub fn always(text: impl Into<String>) -> Self {
        Self::new().with_fallback(text)
    }

    pub fn then_text(self, text: impl Into<String>) -> Self {
        self.push(Ok(text.into()))
    }

    pub fn then_error(self, error: LlmError) -> Self {
        self.push(Err(error))
    }

    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = Some(text.into());
        self
    }

    /// Delay applied before each response.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn push(self, entry: Result<String, LlmError>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(entry);
        }
        self
    }

    /// Number of calls received, including ones that timed out.
    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Scripted entries not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn next_entry(&self) -> Result<String, LlmError> {
        let scripted = self
            .script
            .lock()
            .map_err(|_| invalid("script lock poisoned"))?
            .pop_front();
        match scripted {
            Some(entry) => entry,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| invalid("no scripted response left")),
        }
    }
}

fn invalid(reason: &str) -> LlmError {
    LlmError::InvalidResponse {
        provider: MOCK_PROVIDER.to_string(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn generate(&self, request: &GenerationRequest) -> HearthResult<GenerationResponse> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let text = self.next_entry().map_err(HearthError::Llm)?;
        let prompt_tokens = request
            .messages
            .iter()
            .map(|m| m.content.split_whitespace().count() as u64)
            .sum::<u64>()
            + request.system_instruction.split_whitespace().count() as u64;
        let completion_tokens = text.split_whitespace().count() as u64;

        Ok(GenerationResponse {
            text,
            usage: TokenUsage::new(prompt_tokens, completion_tokens),
            model: MOCK_PROVIDER.to_string(),
        })
    }

    fn model_id(&self) -> &str {
        MOCK_PROVIDER
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::GenerationProfile;

    fn request(content: &str) -> GenerationRequest {
        GenerationRequest::new(
            GenerationProfile {
                temperature: 0.5,
                max_tokens: 100,
            },
            "system prompt",
            content,
        )
    }

    #[tokio::test]
    async fn test_replays_script_in_order() {
        let mock = MockLanguageModel::new()
            .then_text("first")
            .then_error(invalid("boom"))
            .then_text("third");

        assert_eq!(mock.generate(&request("a")).await.unwrap().text, "first");
        assert!(mock.generate(&request("b")).await.is_err());
        assert_eq!(mock.generate(&request("c")).await.unwrap().text, "third");
        assert_eq!(mock.remaining(), 0);
        assert_eq!(mock.call_count(), 3);
        assert_eq!(mock.requests()[1].messages[0].content, "b");
    }

    #[tokio::test]
    async fn test_fallback_after_script() {
        let mock = MockLanguageModel::always("same").then_text("once");
        assert_eq!(mock.generate(&request("a")).await.unwrap().text, "once");
        assert_eq!(mock.generate(&request("b")).await.unwrap().text, "same");
        assert_eq!(mock.generate(&request("c")).await.unwrap().text, "same");
    }

    #[tokio::test]
    async fn test_empty_script_errors() {
        let mock = MockLanguageModel::new();
        let err = mock.generate(&request("a")).await.unwrap_err();
        assert!(matches!(
            err,
            HearthError::Llm(LlmError::InvalidResponse { .. })
        ));
    }

    #[tokio::test]
    async fn test_usage_counts_words() {
        let mock = MockLanguageModel::always("two words");
        let response = mock.generate(&request("three word prompt")).await.unwrap();
        assert_eq!(response.usage.completion_tokens, 2);
        assert_eq!(response.usage.prompt_tokens, 5);
        assert_eq!(response.usage.total_tokens, 7);
    }
}
