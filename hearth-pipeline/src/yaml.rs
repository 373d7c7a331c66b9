//! Phase 4: compile an approved description into an automation definition.

use crate::generation_failed;
use crate::refiner::strip_code_fence;
use hearth_core::{
    AutomationDefinition, CapabilitySet, DefinitionError, GenerationProfile, HearthResult,
    PipelineConfig, PipelineError,
};
use hearth_llm::{GenerationRequest, ModelClient};

const SYSTEM_INSTRUCTION: &str = "You write Home Assistant automations. \
     Translate the description into a single automation in Home Assistant YAML with \
     `alias`, `description`, `mode`, `trigger`, optional `condition` and `action` keys. \
     Use only the entity ids listed. Output the YAML document only, without commentary.";

/// A compiled definition and its checked serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct YamlResult {
    pub definition: AutomationDefinition,
    /// Serialized text that parses back to `definition`
    pub yaml: String,
}

/// Compiles descriptions into automation definitions.
#[derive(Debug, Clone)]
pub struct YamlGenerator {
    client: ModelClient,
    profile: GenerationProfile,
}

impl YamlGenerator {
    pub fn new(client: ModelClient, config: &PipelineConfig) -> Self {
        Self {
            client,
            profile: config.compilation,
        }
    }

    /// Compile `description` into a definition with id `automation_id`.
    ///
    /// Output that fails to parse, fails validation or references an entity
    /// outside `capabilities` gets one corrective retry; a second failure is
    /// `CompilationFailed`. Model call failures surface as
    /// `GenerationFailed`.
    pub async fn compile(
        &self,
        description: &str,
        capabilities: &CapabilitySet,
        automation_id: &str,
    ) -> HearthResult<YamlResult> {
        let request = GenerationRequest::new(
            self.profile,
            SYSTEM_INSTRUCTION,
            format!(
                "Devices:\n{}\n\nDescription: {}",
                capabilities.describe(),
                description
            ),
        );

        let first = self
            .client
            .generate(&request)
            .await
            .map_err(generation_failed)?;
        let error = match checked(&first.text, automation_id, capabilities) {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        tracing::warn!(
            automation_id,
            error = %error,
            "Compiled definition rejected, retrying with feedback"
        );
        let retry = request.with_followup(
            first.text,
            format!(
                "That YAML is not a valid automation: {}. Return the corrected YAML only.",
                error
            ),
        );
        let second = self
            .client
            .generate(&retry)
            .await
            .map_err(generation_failed)?;
        checked(&second.text, automation_id, capabilities).map_err(|e| {
            PipelineError::CompilationFailed {
                reason: e.to_string(),
            }
            .into()
        })
    }
}

/// Parse, check entities, stamp the automation id and confirm the
/// serialization round-trips.
fn checked(
    text: &str,
    automation_id: &str,
    capabilities: &CapabilitySet,
) -> Result<YamlResult, DefinitionError> {
    let mut definition = AutomationDefinition::from_yaml(strip_code_fence(text))?;
    definition.check_entities(capabilities)?;
    definition.id = Some(automation_id.to_string());
    let yaml = definition.to_checked_yaml()?;
    Ok(YamlResult { definition, yaml })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::{HearthError, LlmError};
    use hearth_llm::MockLanguageModel;
    use hearth_test_utils::fixtures::{
        fast_config, living_room_capabilities, BROKEN_YAML, LIVING_ROOM_DESCRIPTION,
        MOTION_LIGHT_YAML,
    };
    use std::sync::Arc;

    const AUTOMATION_ID: &str = "hearth_pattern_living_room_evening_motion";

    fn generator(mock: Arc<MockLanguageModel>) -> YamlGenerator {
        let config = fast_config();
        YamlGenerator::new(ModelClient::from_config(mock, &config), &config)
    }

    #[tokio::test]
    async fn test_compile_valid_definition() {
        let mock = Arc::new(MockLanguageModel::new().then_text(MOTION_LIGHT_YAML));
        let result = generator(mock.clone())
            .compile(LIVING_ROOM_DESCRIPTION, &living_room_capabilities(), AUTOMATION_ID)
            .await
            .unwrap();
        assert_eq!(result.definition.id.as_deref(), Some(AUTOMATION_ID));
        assert_eq!(
            AutomationDefinition::from_yaml(&result.yaml).unwrap(),
            result.definition
        );
        let request = &mock.requests()[0];
        assert_eq!(request.max_tokens, 1200);
        assert!(request.messages[0].content.contains("light.living_room"));
    }

    #[tokio::test]
    async fn test_fenced_output_accepted() {
        let fenced = format!("```yaml\n{}```", MOTION_LIGHT_YAML);
        let mock = Arc::new(MockLanguageModel::new().then_text(fenced));
        let result = generator(mock)
            .compile(LIVING_ROOM_DESCRIPTION, &living_room_capabilities(), AUTOMATION_ID)
            .await
            .unwrap();
        assert_eq!(result.definition.action.len(), 1);
    }

    #[tokio::test]
    async fn test_broken_output_corrected_once() {
        let mock = Arc::new(
            MockLanguageModel::new()
                .then_text(BROKEN_YAML)
                .then_text(MOTION_LIGHT_YAML),
        );
        let result = generator(mock.clone())
            .compile(LIVING_ROOM_DESCRIPTION, &living_room_capabilities(), AUTOMATION_ID)
            .await;
        assert!(result.is_ok());
        let retry = &mock.requests()[1];
        assert_eq!(retry.messages.len(), 3);
        assert!(retry.messages[2].content.contains("not a valid automation"));
    }

    #[tokio::test]
    async fn test_broken_twice_is_compilation_failed() {
        let mock = Arc::new(MockLanguageModel::always(BROKEN_YAML));
        let err = generator(mock.clone())
            .compile(LIVING_ROOM_DESCRIPTION, &living_room_capabilities(), AUTOMATION_ID)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HearthError::Pipeline(PipelineError::CompilationFailed { .. })
        ));
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_missing_actions_rejected() {
        let mock = Arc::new(MockLanguageModel::always(
            "alias: x\ntrigger:\n  - platform: sun\naction: []\n",
        ));
        let err = generator(mock)
            .compile(LIVING_ROOM_DESCRIPTION, &living_room_capabilities(), AUTOMATION_ID)
            .await
            .unwrap_err();
        match err {
            HearthError::Pipeline(PipelineError::CompilationFailed { reason }) => {
                assert!(reason.contains("no actions"));
            }
            other => panic!("expected CompilationFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_entity_corrected_then_rejected() {
        let invented = MOTION_LIGHT_YAML.replace("light.living_room", "light.garage");
        let mock = Arc::new(
            MockLanguageModel::new()
                .then_text(invented.clone())
                .then_text(MOTION_LIGHT_YAML),
        );
        let result = generator(mock.clone())
            .compile(LIVING_ROOM_DESCRIPTION, &living_room_capabilities(), AUTOMATION_ID)
            .await;
        assert!(result.is_ok());
        assert!(mock.requests()[1].messages[2].content.contains("light.garage"));

        let mock = Arc::new(MockLanguageModel::always(invented));
        let err = generator(mock)
            .compile(LIVING_ROOM_DESCRIPTION, &living_room_capabilities(), AUTOMATION_ID)
            .await
            .unwrap_err();
        match err {
            HearthError::Pipeline(PipelineError::CompilationFailed { reason }) => {
                assert!(reason.contains("light.garage"));
            }
            other => panic!("expected CompilationFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_model_failure_is_generation_failed() {
        let mock = Arc::new(MockLanguageModel::new().then_error(LlmError::RequestFailed {
            provider: "mock".to_string(),
            status: 401,
            message: "bad key".to_string(),
        }));
        let err = generator(mock)
            .compile(LIVING_ROOM_DESCRIPTION, &living_room_capabilities(), AUTOMATION_ID)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HearthError::Pipeline(PipelineError::GenerationFailed { attempts: 1, .. })
        ));
    }
}
