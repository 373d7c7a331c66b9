//! Shared wiring for pipeline integration tests.

#![allow(dead_code)]

use hearth_core::{CapabilitySet, PipelineConfig};
use hearth_llm::MockLanguageModel;
use hearth_pipeline::{RecordingTarget, StaticCapabilityGateway, SuggestionService};
use hearth_storage::{InMemorySuggestionStore, InMemoryVersionStore};
use hearth_test_utils::fixtures::fast_config;
use std::sync::Arc;

/// A service over in-memory stores with handles to every collaborator.
pub struct Harness {
    pub service: SuggestionService,
    pub model: Arc<MockLanguageModel>,
    pub suggestions: Arc<InMemorySuggestionStore>,
    pub versions: Arc<InMemoryVersionStore>,
    pub gateway: StaticCapabilityGateway,
    pub target: RecordingTarget,
}

impl Harness {
    pub fn new(model: MockLanguageModel, capabilities: CapabilitySet) -> Self {
        Self::with_config(model, capabilities, fast_config())
    }

    pub fn with_config(
        model: MockLanguageModel,
        capabilities: CapabilitySet,
        config: PipelineConfig,
    ) -> Self {
        let model = Arc::new(model);
        let suggestions = Arc::new(InMemorySuggestionStore::new());
        let versions = Arc::new(InMemoryVersionStore::new());
        let gateway = StaticCapabilityGateway::from_set(capabilities);
        let target = RecordingTarget::new();
        let service = SuggestionService::new(
            &config,
            model.clone(),
            suggestions.clone(),
            versions.clone(),
            Arc::new(gateway.clone()),
            Arc::new(target.clone()),
        )
        .expect("valid test configuration");
        Self {
            service,
            model,
            suggestions,
            versions,
            gateway,
            target,
        }
    }
}
