//! Chat-completions implementation of [`LanguageModel`].

use super::client::OpenAiClient;
use super::types::{CompletionRequest, CompletionResponse, Message, ResponseFormatSpec};
use crate::providers::invalid_response;
use crate::{GenerationRequest, GenerationResponse, LanguageModel, ResponseFormat, TokenUsage};
use async_trait::async_trait;
use hearth_core::{HearthResult, PipelineConfig};

/// Language model backed by an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiCompatibleProvider {
    client: OpenAiClient,
    model: String,
}

impl OpenAiCompatibleProvider {
    /// # Arguments
    /// * `api_key` - Bearer token
    /// * `model` - Model name (e.g., "gpt-4o-mini")
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: OpenAiClient::new(api_key, 60),
            model: model.into(),
        }
    }

    /// Provider for the model named in `config`.
    pub fn from_config(api_key: impl Into<String>, config: &PipelineConfig) -> Self {
        Self::new(api_key, config.model.clone())
    }

    pub fn with_client(client: OpenAiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    /// Provider pointed at a self-hosted compatible server.
    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self::with_client(OpenAiClient::new(api_key, 60).with_base_url(base_url), model)
    }

    fn build_request(&self, request: &GenerationRequest) -> CompletionRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system_instruction.is_empty() {
            messages.push(Message {
                role: "system".to_string(),
                content: Some(request.system_instruction.clone()),
            });
        }
        messages.extend(request.messages.iter().map(|m| Message {
            role: m.role.as_str().to_string(),
            content: Some(m.content.clone()),
        }));

        CompletionRequest {
            model: self.model.clone(),
            messages,
            max_tokens: Some(request.max_tokens),
            temperature: Some(request.temperature),
            response_format: match request.response_format {
                ResponseFormat::Text => None,
                ResponseFormat::JsonObject => Some(ResponseFormatSpec::json_object()),
            },
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleProvider {
    async fn generate(&self, request: &GenerationRequest) -> HearthResult<GenerationResponse> {
        let body = self.build_request(request);
        let response: CompletionResponse = self.client.request("chat/completions", &body).await?;
        into_generation_response(response, &self.model)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

fn into_generation_response(
    response: CompletionResponse,
    requested_model: &str,
) -> HearthResult<GenerationResponse> {
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or_else(|| invalid_response("openai", "No content in response"))?;

    let usage = response
        .usage
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens.unwrap_or(0),
            total_tokens: u.total_tokens,
        })
        .unwrap_or_default();

    Ok(GenerationResponse {
        text,
        usage,
        model: response
            .model
            .unwrap_or_else(|| requested_model.to_string()),
    })
}

impl std::fmt::Debug for OpenAiCompatibleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleProvider")
            .field("client", &self.client)
            .field("model", &self.model)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::{GenerationProfile, HearthError, LlmError};

    fn provider() -> OpenAiCompatibleProvider {
        OpenAiCompatibleProvider::new("sk-test", "gpt-4o-mini")
    }

    #[test]
    fn test_build_request_maps_json_mode_and_system() {
        let request = GenerationRequest::new(
            GenerationProfile {
                temperature: 0.5,
                max_tokens: 400,
            },
            "You refine automation descriptions.",
            "make it blue",
        )
        .json();

        let body = provider().build_request(&request);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["max_tokens"], 400);
        assert_eq!(json["response_format"]["type"], "json_object");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["messages"][1]["content"], "make it blue");
    }

    #[test]
    fn test_from_config_uses_configured_model() {
        let config = PipelineConfig {
            model: "llama3.1:8b".to_string(),
            ..PipelineConfig::default()
        };
        let provider = OpenAiCompatibleProvider::from_config("sk-test", &config);
        assert_eq!(provider.model_id(), "llama3.1:8b");

        let request = GenerationRequest::new(config.description, "", "describe");
        let json = serde_json::to_value(provider.build_request(&request)).unwrap();
        assert_eq!(json["model"], "llama3.1:8b");
    }

    #[test]
    fn test_text_mode_omits_response_format() {
        let request = GenerationRequest::new(
            GenerationProfile {
                temperature: 0.7,
                max_tokens: 200,
            },
            "",
            "describe",
        );
        let json = serde_json::to_value(provider().build_request(&request)).unwrap();
        assert!(json.get("response_format").is_none());
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_response_conversion() {
        let response: CompletionResponse = serde_json::from_str(
            r#"{
                "model": "gpt-4o-mini-2024-07-18",
                "choices": [{"message": {"role": "assistant", "content": "  Turns on the light.  "}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 5, "total_tokens": 17}
            }"#,
        )
        .unwrap();

        let converted = into_generation_response(response, "gpt-4o-mini").unwrap();
        assert_eq!(converted.text, "Turns on the light.");
        assert_eq!(converted.usage.total_tokens, 17);
        assert_eq!(converted.model, "gpt-4o-mini-2024-07-18");
    }

    #[test]
    fn test_empty_choices_is_invalid_response() {
        let response: CompletionResponse =
            serde_json::from_str(r#"{"choices": []}"#).unwrap();
        let err = into_generation_response(response, "gpt-4o-mini").unwrap_err();
        assert!(matches!(
            err,
            HearthError::Llm(LlmError::InvalidResponse { .. })
        ));
    }
}
