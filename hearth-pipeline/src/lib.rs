//! Hearth Pipeline - Conversational Automation Suggestions
//!
//! Takes a detected behaviour pattern through four phases:
//!
//! 1. describe it in plain language ([`DescriptionGenerator`])
//! 2. let the user refine the description, checking each edit against what
//!    the devices can do ([`SuggestionRefiner`])
//! 3. on approval, compile it into an automation ([`YamlGenerator`])
//! 4. score the automation ([`SafetyValidator`]) and deploy it as a new
//!    version ([`VersionManager`])
//!
//! [`SuggestionService`] runs the workflow; [`SuggestionStateTracker`] is the
//! only component that writes suggestion records.

use hearth_core::{HearthError, LlmError, PipelineError};

pub mod deploy;
pub mod description;
pub mod gateway;
pub mod refiner;
pub mod safety;
pub mod service;
pub mod telemetry;
pub mod tracker;
pub mod versions;
pub mod yaml;

pub use deploy::{DeploymentTarget, HomeAssistantTarget, RecordingTarget};
pub use description::{looks_like_automation_syntax, sentence_count, DescriptionGenerator};
pub use gateway::{CapabilityGateway, HttpCapabilityGateway, StaticCapabilityGateway};
pub use refiner::{requested_features, SuggestionRefiner};
pub use safety::SafetyValidator;
pub use service::{OperationGuard, RefinementOutcome, SuggestionService};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
pub use tracker::SuggestionStateTracker;
pub use versions::VersionManager;
pub use yaml::{YamlGenerator, YamlResult};

/// Map a model client failure onto `GenerationFailed`, keeping the attempt
/// count and the last cause.
pub(crate) fn generation_failed(error: HearthError) -> HearthError {
    match error {
        HearthError::Llm(LlmError::RetriesExhausted {
            attempts,
            last_error,
        }) => PipelineError::GenerationFailed {
            attempts,
            reason: last_error,
        }
        .into(),
        HearthError::Llm(other) => PipelineError::GenerationFailed {
            attempts: 1,
            reason: other.to_string(),
        }
        .into(),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::StorageError;

    #[test]
    fn test_generation_failed_keeps_attempts_and_cause() {
        let exhausted = HearthError::Llm(LlmError::RetriesExhausted {
            attempts: 3,
            last_error: "rate limited".to_string(),
        });
        assert_eq!(
            generation_failed(exhausted),
            HearthError::Pipeline(PipelineError::GenerationFailed {
                attempts: 3,
                reason: "rate limited".to_string(),
            })
        );

        let storage = HearthError::Storage(StorageError::LockPoisoned);
        assert_eq!(generation_failed(storage.clone()), storage);
    }
}
