//! Language model provider implementations

pub mod openai;

pub use openai::{OpenAiClient, OpenAiCompatibleProvider};

use hearth_core::{HearthError, LlmError};

pub(crate) fn request_failed(provider: &str, status: u16, message: impl Into<String>) -> HearthError {
    HearthError::Llm(LlmError::RequestFailed {
        provider: provider.to_string(),
        status,
        message: message.into(),
    })
}

pub(crate) fn rate_limited(provider: &str, retry_after_ms: u64) -> HearthError {
    HearthError::Llm(LlmError::RateLimited {
        provider: provider.to_string(),
        retry_after_ms,
    })
}

pub(crate) fn invalid_response(provider: &str, reason: impl Into<String>) -> HearthError {
    HearthError::Llm(LlmError::InvalidResponse {
        provider: provider.to_string(),
        reason: reason.into(),
    })
}
