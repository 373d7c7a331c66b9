//! Hearth LLM - Language Model Abstraction
//!
//! Provider-agnostic trait for text generation, the retrying client the
//! pipeline talks to, and concrete providers.

use async_trait::async_trait;
use hearth_core::{GenerationProfile, HearthResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

pub mod client;
pub mod mock;
pub mod providers;
pub mod retry;

pub use client::ModelClient;
pub use mock::MockLanguageModel;
pub use providers::OpenAiCompatibleProvider;
pub use retry::{ExponentialBackoff, RetryPolicy};

// ============================================================================
// REQUEST / RESPONSE
// ============================================================================

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message of conversation content sent to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Output shape the provider is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Text,
    /// Provider must return a single JSON object
    JsonObject,
}

/// A single generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub system_instruction: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(default)]
    pub response_format: ResponseFormat,
}

impl GenerationRequest {
    /// Build a request from a phase profile with one user message.
    pub fn new(
        profile: GenerationProfile,
        system_instruction: impl Into<String>,
        user_content: impl Into<String>,
    ) -> Self {
        Self {
            system_instruction: system_instruction.into(),
            messages: vec![ChatMessage::user(user_content)],
            temperature: profile.temperature,
            max_tokens: profile.max_tokens,
            response_format: ResponseFormat::Text,
        }
    }

    pub fn json(mut self) -> Self {
        self.response_format = ResponseFormat::JsonObject;
        self
    }

    /// Append a follow-up exchange (previous answer plus corrective feedback).
    pub fn with_followup(
        mut self,
        previous_answer: impl Into<String>,
        feedback: impl Into<String>,
    ) -> Self {
        self.messages.push(ChatMessage::assistant(previous_answer));
        self.messages.push(ChatMessage::user(feedback));
        self
    }
}

/// Token counters reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Generated text plus usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub text: String,
    pub usage: TokenUsage,
    pub model: String,
}

// ============================================================================
// LANGUAGE MODEL TRAIT
// ============================================================================

/// Trait for text generation providers.
/// Implementations must be thread-safe (Send + Sync).
///
/// A provider makes exactly one attempt per call. Retries, timeouts and
/// concurrency limits are applied by [`ModelClient`].
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Run one generation.
    ///
    /// # Returns
    /// * `Ok(GenerationResponse)` - The generated text and usage counters
    /// * `Err(HearthError::Llm)` - If the call fails
    async fn generate(&self, request: &GenerationRequest) -> HearthResult<GenerationResponse>;

    /// Model identifier reported in logs and responses.
    fn model_id(&self) -> &str;
}

// ============================================================================
// USAGE TRACKER
// ============================================================================

/// Tracks calls and token usage across all model calls.
/// Thread-safe via atomic operations.
#[derive(Default)]
pub struct UsageTracker {
    calls: AtomicU64,
    failures: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful call.
    pub fn record(&self, usage: &TokenUsage) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.prompt_tokens
            .fetch_add(usage.prompt_tokens, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(usage.completion_tokens, Ordering::Relaxed);
    }

    /// Record a failed attempt.
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn prompt_tokens(&self) -> u64 {
        self.prompt_tokens.load(Ordering::Relaxed)
    }

    pub fn completion_tokens(&self) -> u64 {
        self.completion_tokens.load(Ordering::Relaxed)
    }

    /// Snapshot of the accumulated token counts.
    pub fn totals(&self) -> TokenUsage {
        TokenUsage::new(self.prompt_tokens(), self.completion_tokens())
    }

    pub fn reset(&self) {
        self.calls.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.prompt_tokens.store(0, Ordering::Relaxed);
        self.completion_tokens.store(0, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for UsageTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageTracker")
            .field("calls", &self.calls())
            .field("failures", &self.failures())
            .field("prompt_tokens", &self.prompt_tokens())
            .field("completion_tokens", &self.completion_tokens())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
