//! Phase 3: apply a user's edit to the description and validate it against
//! the devices' capabilities.
//!
//! The model is asked for a fixed JSON shape:
//!
//! ```json
//! {"description": "...", "validation": {"is_valid": true, "violations": []}}
//! ```
//!
//! Its verdict is not trusted on its own. The edit is also scanned locally for
//! the known feature vocabulary, and the reported violations are the union of
//! both checks.

use crate::generation_failed;
use hearth_core::{
    CapabilitySet, GenerationProfile, HearthResult, HistoryEntry, PipelineConfig, PipelineError,
    RefinementResult, ValidationResult, FEATURE_BRIGHTNESS, FEATURE_COLOR, FEATURE_COLOR_TEMP,
    FEATURE_EFFECT, FEATURE_FLASH, FEATURE_TRANSITION,
};
use hearth_llm::{ChatMessage, GenerationRequest, ModelClient};
use serde::Deserialize;
use std::collections::BTreeSet;

/// Prior turns replayed to the model.
const HISTORY_WINDOW: usize = 10;

const MALFORMED_FEEDBACK: &str = "That reply was not the required JSON object. \
     Reply with exactly {\"description\": string, \"validation\": \
     {\"is_valid\": bool, \"violations\": [string]}} and nothing else.";

/// Phrases that request a color temperature. Checked before plain color words
/// so that "colour temperature" does not also count as a color request.
const COLOR_TEMP_PHRASES: &[&str] = &[
    "color temperature",
    "colour temperature",
    "color temp",
    "colour temp",
    "warm white",
    "cool white",
    "cold white",
    "daylight white",
    "kelvin",
    "warmer",
    "cooler",
];

const COLOR_WORDS: &[&str] = &[
    "color", "colour", "colors", "colours", "colored", "coloured", "rgb", "hue", "red", "green",
    "blue", "purple", "pink", "orange", "yellow", "teal", "cyan", "magenta", "violet", "amber",
];

const BRIGHTNESS_WORDS: &[&str] = &[
    "brightness", "bright", "brighter", "dim", "dimmer", "dimmed", "dimming", "percent",
];

const TRANSITION_WORDS: &[&str] = &[
    "fade", "fades", "fading", "transition", "gradually", "slowly", "gently",
];

const EFFECT_WORDS: &[&str] = &["effect", "effects", "rainbow", "colorloop", "colourloop", "disco"];

const FLASH_WORDS: &[&str] = &["flash", "flashes", "flashing", "blink", "blinks", "blinking", "strobe"];

/// Features from the known vocabulary that a user edit asks for.
pub fn requested_features(edit: &str) -> BTreeSet<&'static str> {
    let mut text = edit.to_lowercase();
    let mut features = BTreeSet::new();

    for phrase in COLOR_TEMP_PHRASES {
        if text.contains(phrase) {
            features.insert(FEATURE_COLOR_TEMP);
            text = text.replace(phrase, " ");
        }
    }

    if text.contains('%') {
        features.insert(FEATURE_BRIGHTNESS);
    }

    let words: BTreeSet<&str> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let table: [(&'static str, &[&str]); 5] = [
        (FEATURE_COLOR, COLOR_WORDS),
        (FEATURE_BRIGHTNESS, BRIGHTNESS_WORDS),
        (FEATURE_TRANSITION, TRANSITION_WORDS),
        (FEATURE_EFFECT, EFFECT_WORDS),
        (FEATURE_FLASH, FLASH_WORDS),
    ];
    for (feature, vocabulary) in table {
        if vocabulary.iter().any(|w| words.contains(w)) {
            features.insert(feature);
        }
    }
    features
}

/// Wire shape of the model's structured reply.
#[derive(Debug, Deserialize)]
struct RefinementReply {
    description: String,
    #[serde(default)]
    validation: ValidationResult,
}

fn parse_reply(text: &str) -> Result<RefinementReply, String> {
    let body = strip_code_fence(text);
    let reply: RefinementReply =
        serde_json::from_str(body).map_err(|e| format!("malformed refinement JSON: {}", e))?;
    if reply.description.trim().is_empty() {
        return Err("refinement reply has an empty description".to_string());
    }
    Ok(reply)
}

/// Remove a surrounding Markdown code fence, if any.
pub(crate) fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Applies user edits through a constrained generation call.
#[derive(Debug, Clone)]
pub struct SuggestionRefiner {
    client: ModelClient,
    profile: GenerationProfile,
    structured_output_retries: u32,
}

impl SuggestionRefiner {
    pub fn new(client: ModelClient, config: &PipelineConfig) -> Self {
        Self {
            client,
            profile: config.refinement,
            structured_output_retries: config.structured_output_retries,
        }
    }

    /// Refine `current_description` with `user_edit`.
    ///
    /// An empty edit fails with `EmptyEdit` before any model call. The result
    /// always carries one user entry and one system entry, valid or not.
    pub async fn refine(
        &self,
        current_description: &str,
        user_edit: &str,
        capabilities: &CapabilitySet,
        history: &[HistoryEntry],
    ) -> HearthResult<RefinementResult> {
        let edit = user_edit.trim();
        if edit.is_empty() {
            return Err(PipelineError::EmptyEdit.into());
        }

        let mut request = build_request(
            self.profile,
            current_description,
            edit,
            capabilities,
            history,
        );

        let max_attempts = self.structured_output_retries + 1;
        let mut attempt = 0u32;
        let reply = loop {
            attempt += 1;
            let response = self
                .client
                .generate(&request)
                .await
                .map_err(generation_failed)?;
            match parse_reply(&response.text) {
                Ok(reply) => break reply,
                Err(reason) if attempt >= max_attempts => {
                    return Err(PipelineError::GenerationFailed {
                        attempts: attempt,
                        reason,
                    }
                    .into());
                }
                Err(reason) => {
                    tracing::warn!(attempt, reason = %reason, "Refinement reply rejected, retrying");
                    request = request.with_followup(response.text, MALFORMED_FEEDBACK);
                }
            }
        };

        // The model's list only counts where the devices really lack the feature.
        let local = capabilities.unsupported(requested_features(edit));
        let violations: BTreeSet<String> = local
            .into_iter()
            .chain(
                reply
                    .validation
                    .violations
                    .into_iter()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty() && !capabilities.supports(v)),
            )
            .collect();
        let validation = ValidationResult::with_violations(violations.into_iter().collect());

        let updated_description = reply.description.trim().to_string();
        tracing::debug!(
            is_valid = validation.is_valid,
            violations = ?validation.violations,
            "Refinement validated"
        );

        Ok(RefinementResult {
            appended_history: vec![
                HistoryEntry::user(edit),
                HistoryEntry::system(updated_description.clone()),
            ],
            updated_description,
            validation,
        })
    }
}

fn build_request(
    profile: GenerationProfile,
    current_description: &str,
    edit: &str,
    capabilities: &CapabilitySet,
    history: &[HistoryEntry],
) -> GenerationRequest {
    let system = format!(
        "You revise smart home automation descriptions. Apply the user's requested change \
         to the current description and keep it to one or two plain sentences. \
         The devices involved and what they support:\n{}\n\
         If the change needs a feature no device supports, still write the description \
         the user asked for and list each unsupported feature by name \
         (brightness, color, color_temp, transition, effect, flash) in `violations`. \
         Reply with a JSON object: {{\"description\": string, \"validation\": \
         {{\"is_valid\": bool, \"violations\": [string]}}}}.",
        capabilities.describe()
    );

    let start = history.len().saturating_sub(HISTORY_WINDOW);
    let mut messages: Vec<ChatMessage> = history[start..]
        .iter()
        .map(|entry| match entry.actor {
            hearth_core::Actor::User => ChatMessage::user(entry.text.clone()),
            hearth_core::Actor::System => ChatMessage::assistant(entry.text.clone()),
        })
        .collect();
    messages.push(ChatMessage::user(format!(
        "Current description: {}\nRequested change: {}",
        current_description, edit
    )));

    let mut request = GenerationRequest::new(profile, system, String::new()).json();
    request.messages = messages;
    request
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::{Actor, HearthError};
    use hearth_llm::{MockLanguageModel, ResponseFormat};
    use hearth_test_utils::fixtures::{
        bedroom_capabilities, fast_config, living_room_capabilities, refinement_json,
        BEDROOM_DESCRIPTION,
    };
    use std::sync::Arc;

    fn refiner(mock: Arc<MockLanguageModel>) -> SuggestionRefiner {
        let config = fast_config();
        SuggestionRefiner::new(ModelClient::from_config(mock, &config), &config)
    }

    #[test]
    fn test_requested_features_keywords() {
        let blue = requested_features("make it blue");
        assert_eq!(blue.into_iter().collect::<Vec<_>>(), vec![FEATURE_COLOR]);

        let temp = requested_features("use a warm white colour temperature");
        assert!(temp.contains(FEATURE_COLOR_TEMP));
        assert!(!temp.contains(FEATURE_COLOR));

        let dim = requested_features("dim it to 30% and fade in slowly");
        assert!(dim.contains(FEATURE_BRIGHTNESS));
        assert!(dim.contains(FEATURE_TRANSITION));

        assert!(requested_features("make it blink").contains(FEATURE_FLASH));
        assert!(requested_features("only on weekdays").is_empty());
        // Substrings do not match whole words.
        assert!(requested_features("when I'm bored").is_empty());
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
    }

    #[tokio::test]
    async fn test_empty_edit_makes_no_model_call() {
        let mock = Arc::new(MockLanguageModel::always("unused"));
        let err = refiner(mock.clone())
            .refine(BEDROOM_DESCRIPTION, "   ", &bedroom_capabilities(), &[])
            .await
            .unwrap_err();
        assert_eq!(err, HearthError::Pipeline(PipelineError::EmptyEdit));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_color_flagged_even_if_model_says_valid() {
        let reply = refinement_json(
            "When the Bedroom Door opens after sunset, the Bedroom Light turns on in blue.",
            &[],
        );
        let mock = Arc::new(MockLanguageModel::new().then_text(reply));
        let result = refiner(mock.clone())
            .refine(BEDROOM_DESCRIPTION, "make it blue", &bedroom_capabilities(), &[])
            .await
            .unwrap();

        assert!(!result.validation.is_valid);
        assert_eq!(result.validation.violations, vec!["color".to_string()]);
        assert!(result.updated_description.contains("blue"));
        assert_eq!(result.appended_history.len(), 2);
        assert_eq!(result.appended_history[0].actor, Actor::User);
        assert_eq!(result.appended_history[0].text, "make it blue");
        assert_eq!(result.appended_history[1].actor, Actor::System);

        let request = &mock.requests()[0];
        assert_eq!(request.response_format, ResponseFormat::JsonObject);
        assert_eq!(request.max_tokens, 400);
    }

    #[tokio::test]
    async fn test_supported_edit_is_valid() {
        let reply = refinement_json("The Living Room Light turns on in blue.", &[]);
        let mock = Arc::new(MockLanguageModel::new().then_text(reply));
        let result = refiner(mock)
            .refine("The light turns on.", "make it blue", &living_room_capabilities(), &[])
            .await
            .unwrap();
        assert!(result.validation.is_valid);
        assert!(result.validation.violations.is_empty());
    }

    #[tokio::test]
    async fn test_model_reported_violations_are_kept() {
        let reply = refinement_json("The Bedroom Light pulses gently.", &["effect"]);
        let mock = Arc::new(MockLanguageModel::new().then_text(reply));
        let result = refiner(mock)
            .refine(BEDROOM_DESCRIPTION, "make it pulse", &bedroom_capabilities(), &[])
            .await
            .unwrap();
        assert_eq!(result.validation.violations, vec!["effect".to_string()]);
    }

    #[tokio::test]
    async fn test_model_violation_for_supported_feature_dropped() {
        let reply = refinement_json("The Living Room Light turns on at 40%.", &["brightness"]);
        let mock = Arc::new(MockLanguageModel::new().then_text(reply));
        let result = refiner(mock)
            .refine(
                "The Living Room Light turns on.",
                "dim it to 40%",
                &living_room_capabilities(),
                &[],
            )
            .await
            .unwrap();
        assert!(result.validation.is_valid);
        assert!(result.validation.violations.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_reply_retried_then_fails() {
        let mock = Arc::new(MockLanguageModel::always("Sure! I made it blue."));
        let err = refiner(mock.clone())
            .refine(BEDROOM_DESCRIPTION, "make it blue", &bedroom_capabilities(), &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HearthError::Pipeline(PipelineError::GenerationFailed { attempts: 2, .. })
        ));
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_malformed_then_valid_reply() {
        let mock = Arc::new(
            MockLanguageModel::new()
                .then_text("not json")
                .then_text(refinement_json("The Bedroom Light turns on dimmed.", &[])),
        );
        let result = refiner(mock.clone())
            .refine(BEDROOM_DESCRIPTION, "dim it", &bedroom_capabilities(), &[])
            .await
            .unwrap();
        assert!(result.validation.is_valid);
        assert_eq!(mock.requests()[1].messages.len(), 3);
    }

    #[tokio::test]
    async fn test_history_replayed_as_chat_turns() {
        let history = vec![
            HistoryEntry::user("only after sunset"),
            HistoryEntry::system(BEDROOM_DESCRIPTION),
        ];
        let mock = Arc::new(
            MockLanguageModel::new().then_text(refinement_json(BEDROOM_DESCRIPTION, &[])),
        );
        refiner(mock.clone())
            .refine(BEDROOM_DESCRIPTION, "dim it to 40%", &bedroom_capabilities(), &history)
            .await
            .unwrap();
        let messages = &mock.requests()[0].messages;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, "only after sunset");
        assert!(messages[2].content.contains("dim it to 40%"));
    }
}
