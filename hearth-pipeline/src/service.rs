//! Orchestration of the whole suggestion workflow.
//!
//! At most one operation runs per suggestion. A second call while one is in
//! flight fails with `Busy`. The slot is released when the operation's guard
//! drops, which includes the future being dropped by a cancelled caller.
//!
//! Deployment and rollback also claim the automation id, so two suggestions
//! targeting the same automation never push concurrently. Once a definition
//! has passed the safety gate, installing it runs as its own task: a caller
//! that stops waiting does not stop the push, the version record and the
//! phase change from completing together.

use crate::{
    CapabilityGateway, DeploymentTarget, DescriptionGenerator, SafetyValidator,
    SuggestionRefiner, SuggestionStateTracker, VersionManager, YamlGenerator,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hearth_core::{
    AutomationDefinition, AutomationVersion, CapabilitySet, DetectedPattern, HearthError,
    HearthResult, PatternReference, PipelineConfig, PipelineError, RefinementResult,
    SafetyResult, StorageError, Suggestion, SuggestionId, SuggestionPhase, Transition,
};
use hearth_llm::{LanguageModel, ModelClient, UsageTracker};
use hearth_storage::{SuggestionStore, VersionStore};
use std::hash::Hash;
use std::sync::Arc;

// ============================================================================
// EXCLUSION
// ============================================================================

/// Held for the duration of one operation on one suggestion or automation.
#[derive(Debug)]
pub struct OperationGuard<K: Eq + Hash = SuggestionId> {
    in_flight: Arc<DashMap<K, &'static str>>,
    key: K,
}

impl<K: Eq + Hash> Drop for OperationGuard<K> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

/// Claim `key` for `operation`, or return the operation already holding it.
fn claim<K: Eq + Hash + Clone>(
    in_flight: &Arc<DashMap<K, &'static str>>,
    key: K,
    operation: &'static str,
) -> Result<OperationGuard<K>, &'static str> {
    match in_flight.entry(key.clone()) {
        Entry::Occupied(running) => Err(*running.get()),
        Entry::Vacant(slot) => {
            slot.insert(operation);
            Ok(OperationGuard {
                in_flight: Arc::clone(in_flight),
                key,
            })
        }
    }
}

// ============================================================================
// REFINEMENT OUTCOME
// ============================================================================

/// Updated record plus the refinement that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct RefinementOutcome {
    pub suggestion: Suggestion,
    pub result: RefinementResult,
}

impl RefinementOutcome {
    /// `ValidationFailed` listing the violations, if there are any.
    ///
    /// The refinement is recorded either way; this is for callers that want
    /// to surface unsupported capabilities as an error.
    pub fn validation_error(&self) -> Option<PipelineError> {
        if self.result.validation.is_valid {
            None
        } else {
            Some(PipelineError::ValidationFailed {
                violations: self.result.validation.violations.clone(),
            })
        }
    }
}

// ============================================================================
// SERVICE
// ============================================================================

/// Entry point for every suggestion operation.
pub struct SuggestionService {
    tracker: SuggestionStateTracker,
    gateway: Arc<dyn CapabilityGateway>,
    client: ModelClient,
    describer: DescriptionGenerator,
    refiner: SuggestionRefiner,
    compiler: YamlGenerator,
    safety: SafetyValidator,
    versions: VersionManager,
    target: Arc<dyn DeploymentTarget>,
    in_flight: Arc<DashMap<SuggestionId, &'static str>>,
    automations_in_flight: Arc<DashMap<String, &'static str>>,
}

impl SuggestionService {
    /// Wire every component from one configuration.
    ///
    /// The configuration is validated first. All model-backed components
    /// share one client and therefore one concurrency limit.
    pub fn new(
        config: &PipelineConfig,
        model: Arc<dyn LanguageModel>,
        suggestions: Arc<dyn SuggestionStore>,
        versions: Arc<dyn VersionStore>,
        gateway: Arc<dyn CapabilityGateway>,
        target: Arc<dyn DeploymentTarget>,
    ) -> HearthResult<Self> {
        config.validate()?;
        let client = ModelClient::from_config(model, config);
        Ok(Self {
            tracker: SuggestionStateTracker::new(suggestions),
            gateway,
            describer: DescriptionGenerator::new(client.clone(), config),
            refiner: SuggestionRefiner::new(client.clone(), config),
            compiler: YamlGenerator::new(client.clone(), config),
            client,
            safety: SafetyValidator::new(config),
            versions: VersionManager::new(versions),
            target,
            in_flight: Arc::new(DashMap::new()),
            automations_in_flight: Arc::new(DashMap::new()),
        })
    }

    /// Token and call counters across every model-backed component.
    pub fn usage(&self) -> &UsageTracker {
        self.client.usage()
    }

    pub fn versions(&self) -> &VersionManager {
        &self.versions
    }

    /// Claim the suggestion for `operation` or fail with `Busy`.
    fn begin(
        &self,
        suggestion_id: SuggestionId,
        operation: &'static str,
    ) -> HearthResult<OperationGuard> {
        claim(&self.in_flight, suggestion_id, operation).map_err(|running| {
            tracing::debug!(
                suggestion_id = %suggestion_id,
                running,
                rejected = operation,
                "Operation rejected, suggestion busy"
            );
            PipelineError::Busy { suggestion_id }.into()
        })
    }

    /// Claim the automation for `operation` or fail with `AutomationBusy`.
    fn begin_automation(
        &self,
        automation_id: &str,
        operation: &'static str,
    ) -> HearthResult<OperationGuard<String>> {
        claim(&self.automations_in_flight, automation_id.to_string(), operation).map_err(
            |running| {
                tracing::debug!(
                    automation_id,
                    running,
                    rejected = operation,
                    "Operation rejected, automation busy"
                );
                PipelineError::AutomationBusy {
                    automation_id: automation_id.to_string(),
                }
                .into()
            },
        )
    }

    fn installer(&self) -> Installer {
        Installer {
            tracker: self.tracker.clone(),
            versions: self.versions.clone(),
            target: Arc::clone(&self.target),
        }
    }

    /// Whether an operation is currently running for `suggestion_id`.
    pub fn is_busy(&self, suggestion_id: SuggestionId) -> bool {
        self.in_flight.contains_key(&suggestion_id)
    }

    // === Creation and lookup ===

    /// Create a suggestion for `pattern` targeting the pattern's own automation id.
    pub async fn create(&self, pattern: &DetectedPattern) -> HearthResult<Suggestion> {
        let reference = PatternReference::from(pattern);
        let automation_id = Suggestion::automation_id_for(&reference);
        self.tracker
            .create(Suggestion::new(reference, automation_id))
            .await
    }

    /// Create a suggestion that will deploy to an existing automation.
    pub async fn create_for_automation(
        &self,
        pattern: &DetectedPattern,
        automation_id: impl Into<String>,
    ) -> HearthResult<Suggestion> {
        self.tracker
            .create(Suggestion::new(PatternReference::from(pattern), automation_id))
            .await
    }

    pub async fn get(&self, suggestion_id: SuggestionId) -> HearthResult<Suggestion> {
        self.tracker.load(suggestion_id).await
    }

    // === Phase 2 ===

    /// Generate the first description.
    ///
    /// `pattern` must be the one the suggestion was created from. A model
    /// failure leaves the suggestion in `description_pending`.
    pub async fn generate_description(
        &self,
        suggestion_id: SuggestionId,
        pattern: &DetectedPattern,
    ) -> HearthResult<Suggestion> {
        let _guard = self.begin(suggestion_id, "generate_description")?;
        let suggestion = self.tracker.load(suggestion_id).await?;
        self.tracker.ensure(&suggestion, Transition::GenerateOk)?;
        if suggestion.pattern.pattern_id != pattern.pattern_id {
            return Err(HearthError::Storage(StorageError::NotFound {
                entity: "pattern for suggestion",
                id: pattern.pattern_id.clone(),
            }));
        }

        let description = self.describer.generate(pattern).await?;
        self.tracker
            .apply(&suggestion, &[Transition::GenerateOk], |s| {
                s.description = description;
            })
            .await
    }

    // === Phase 3 ===

    /// Apply a user edit.
    ///
    /// The model call happens before anything is written. Unsupported
    /// capabilities do not fail the call: the refinement is recorded and the
    /// suggestion stays in `refining`.
    pub async fn refine(
        &self,
        suggestion_id: SuggestionId,
        user_edit: &str,
    ) -> HearthResult<RefinementOutcome> {
        let _guard = self.begin(suggestion_id, "refine")?;
        let suggestion = self.tracker.load(suggestion_id).await?;
        self.tracker.ensure(&suggestion, Transition::UserEdits)?;
        if user_edit.trim().is_empty() {
            return Err(PipelineError::EmptyEdit.into());
        }

        let capabilities = self
            .gateway
            .capability_set(&suggestion.pattern.entity_ids)
            .await?;
        let result = self
            .refiner
            .refine(
                &suggestion.description,
                user_edit,
                &capabilities,
                &suggestion.conversation_history,
            )
            .await?;

        if !result.validation.is_valid {
            tracing::info!(
                suggestion_id = %suggestion_id,
                violations = ?result.validation.violations,
                "Refinement references unsupported capabilities"
            );
        }
        let updated = self
            .tracker
            .record_refinement(&suggestion, &result, capabilities)
            .await?;
        Ok(RefinementOutcome {
            suggestion: updated,
            result,
        })
    }

    // === Phase 4 ===

    /// Approve the description and compile it.
    ///
    /// Nothing is written until the compiler returns. On success approval and
    /// compilation are recorded in one write and the suggestion is in
    /// `yaml_generated`. A model failure or a dropped call leaves it where it
    /// was.
    pub async fn approve(&self, suggestion_id: SuggestionId) -> HearthResult<Suggestion> {
        const APPROVE_AND_COMPILE: &[Transition] =
            &[Transition::UserApproves, Transition::CompileOk];

        let _guard = self.begin(suggestion_id, "approve")?;
        let suggestion = self.tracker.load(suggestion_id).await?;
        self.tracker.target_phase(&suggestion, APPROVE_AND_COMPILE)?;
        self.compile_and_record(suggestion, APPROVE_AND_COMPILE).await
    }

    /// Compile a suggestion already in `approved`.
    pub async fn compile(&self, suggestion_id: SuggestionId) -> HearthResult<Suggestion> {
        let _guard = self.begin(suggestion_id, "compile")?;
        let suggestion = self.tracker.load(suggestion_id).await?;
        self.tracker.ensure(&suggestion, Transition::CompileOk)?;
        self.compile_and_record(suggestion, &[Transition::CompileOk])
            .await
    }

    /// Compile, then write `transitions` together with the definition.
    ///
    /// A rejected compilation records the phase the suggestion had before
    /// the call as its last good phase.
    async fn compile_and_record(
        &self,
        suggestion: Suggestion,
        transitions: &[Transition],
    ) -> HearthResult<Suggestion> {
        let capabilities = self.capabilities_for(&suggestion).await?;
        let compiled = self
            .compiler
            .compile(&suggestion.description, &capabilities, &suggestion.automation_id)
            .await;

        match compiled {
            Ok(result) => {
                self.tracker
                    .apply(&suggestion, transitions, |s| {
                        s.automation_definition = Some(result.yaml);
                        s.device_capability_snapshot = capabilities;
                    })
                    .await
            }
            Err(HearthError::Pipeline(PipelineError::CompilationFailed { reason })) => {
                self.tracker
                    .fail(
                        &suggestion,
                        Transition::UnrecoverableError,
                        suggestion.phase,
                        format!("compilation failed: {}", reason),
                        |_| {},
                    )
                    .await?;
                Err(PipelineError::CompilationFailed { reason }.into())
            }
            Err(other) => Err(other),
        }
    }

    async fn capabilities_for(&self, suggestion: &Suggestion) -> HearthResult<CapabilitySet> {
        if suggestion.device_capability_snapshot.is_empty() {
            self.gateway
                .capability_set(&suggestion.pattern.entity_ids)
                .await
        } else {
            Ok(suggestion.device_capability_snapshot.clone())
        }
    }

    // === Safety gate and deployment ===

    /// Score the compiled definition and deploy it if it passes.
    ///
    /// A rejected definition moves the suggestion to `failed` and records no
    /// version. A failed push does the same and re-installs the active
    /// version, if any. Fails with `AutomationBusy` while another deployment
    /// or rollback of the same automation runs.
    pub async fn deploy(&self, suggestion_id: SuggestionId) -> HearthResult<Suggestion> {
        let guard = self.begin(suggestion_id, "deploy")?;
        let suggestion = self.tracker.load(suggestion_id).await?;
        self.tracker.ensure(&suggestion, Transition::SafetyPass)?;
        let automation_guard = self.begin_automation(&suggestion.automation_id, "deploy")?;

        let text = suggestion.automation_definition.clone().ok_or_else(|| {
            HearthError::Storage(StorageError::UpdateFailed {
                entity: "suggestion",
                id: suggestion_id.to_string(),
                reason: format!("no automation definition in phase {}", suggestion.phase),
            })
        })?;

        let definition = match AutomationDefinition::from_yaml(&text) {
            Ok(definition) => definition,
            Err(e) => {
                let reason = e.to_string();
                self.tracker
                    .fail(
                        &suggestion,
                        Transition::UnrecoverableError,
                        SuggestionPhase::Approved,
                        format!("stored definition no longer parses: {}", reason),
                        |_| {},
                    )
                    .await?;
                return Err(PipelineError::CompilationFailed { reason }.into());
            }
        };

        let assessment = self.safety.assess(&definition);
        if let Err(rejection) = self.safety.gate(&assessment) {
            let summary = assessment.summary();
            self.tracker
                .fail(
                    &suggestion,
                    Transition::SafetyFail,
                    SuggestionPhase::YamlGenerated,
                    format!("safety check failed: {}", summary),
                    |s| {
                        s.safety_score = Some(assessment.score);
                        s.safety_issues = assessment.issues;
                    },
                )
                .await?;
            return Err(rejection);
        }

        let automation_id = suggestion.automation_id.clone();
        let installer = self.installer();
        let install = tokio::spawn(async move {
            let _guards = (guard, automation_guard);
            installer.install(suggestion, text, assessment).await
        });
        install.await.map_err(|e| {
            HearthError::from(PipelineError::DeploymentFailed {
                automation_id,
                reason: format!("install task ended: {}", e),
            })
        })?
    }

    // === Cancellation and rollback ===

    /// Reject the suggestion. Fails with `Busy` while another operation runs.
    pub async fn cancel(&self, suggestion_id: SuggestionId) -> HearthResult<Suggestion> {
        let _guard = self.begin(suggestion_id, "cancel")?;
        let suggestion = self.tracker.load(suggestion_id).await?;
        self.tracker
            .apply(&suggestion, &[Transition::UserCancels], |_| {})
            .await
    }

    /// Re-install the version before the active one and make it active.
    ///
    /// Fails with `AutomationBusy` while the automation is being deployed.
    pub async fn rollback(&self, automation_id: &str) -> HearthResult<AutomationVersion> {
        let guard = self.begin_automation(automation_id, "rollback")?;
        let previous = self.versions.previous(automation_id).await?;

        let installer = self.installer();
        let owned_id = automation_id.to_string();
        let task = tokio::spawn(async move {
            let _guard = guard;
            installer
                .target
                .push(&owned_id, &previous.definition_text)
                .await?;
            installer.versions.rollback(&owned_id).await
        });
        task.await.map_err(|e| {
            HearthError::from(PipelineError::DeploymentFailed {
                automation_id: automation_id.to_string(),
                reason: format!("rollback task ended: {}", e),
            })
        })?
    }
}

// ============================================================================
// INSTALLATION
// ============================================================================

/// Pushes a gated definition, records its version and marks the suggestion
/// deployed. Owns its handles so it can run detached from the caller.
#[derive(Clone)]
struct Installer {
    tracker: SuggestionStateTracker,
    versions: VersionManager,
    target: Arc<dyn DeploymentTarget>,
}

impl Installer {
    async fn install(
        self,
        suggestion: Suggestion,
        text: String,
        assessment: SafetyResult,
    ) -> HearthResult<Suggestion> {
        let automation_id = suggestion.automation_id.clone();

        // A version already recorded for this suggestion means an earlier
        // install got that far; finish it instead of appending another.
        let recorded = match self.recorded_version(&suggestion).await? {
            Some(version) => {
                tracing::info!(
                    automation_id = %automation_id,
                    version_id = %version.version_id,
                    "Version already recorded for suggestion, completing deployment"
                );
                Ok(version)
            }
            None => self.push_and_record(&suggestion, &text, assessment.score).await,
        };

        let version = match recorded {
            Ok(version) => version,
            Err(e) => {
                let reason = e.to_string();
                self.restore_active(&automation_id).await;
                self.tracker
                    .fail(
                        &suggestion,
                        Transition::UnrecoverableError,
                        SuggestionPhase::YamlGenerated,
                        format!("deployment failed: {}", reason),
                        |s| {
                            s.safety_score = Some(assessment.score);
                            s.safety_issues = assessment.issues;
                        },
                    )
                    .await?;
                return Err(match e {
                    HearthError::Pipeline(PipelineError::DeploymentFailed { .. }) => e,
                    other => PipelineError::DeploymentFailed {
                        automation_id,
                        reason: other.to_string(),
                    }
                    .into(),
                });
            }
        };

        self.tracker
            .apply(&suggestion, &[Transition::SafetyPass], |s| {
                s.safety_score = Some(assessment.score);
                s.safety_issues = assessment.issues;
                s.deployed_version_id = Some(version.version_id);
            })
            .await
    }

    async fn recorded_version(
        &self,
        suggestion: &Suggestion,
    ) -> HearthResult<Option<AutomationVersion>> {
        Ok(self
            .versions
            .history(&suggestion.automation_id)
            .await?
            .into_iter()
            .rev()
            .find(|v| v.suggestion_id == Some(suggestion.suggestion_id)))
    }

    async fn push_and_record(
        &self,
        suggestion: &Suggestion,
        text: &str,
        safety_score: u8,
    ) -> HearthResult<AutomationVersion> {
        self.target.push(&suggestion.automation_id, text).await?;
        self.versions
            .deploy(
                &suggestion.automation_id,
                text,
                safety_score,
                Some(suggestion.suggestion_id),
            )
            .await
    }

    /// Best-effort re-push of the active version after a failed deployment.
    async fn restore_active(&self, automation_id: &str) {
        match self.versions.active(automation_id).await {
            Ok(Some(active)) => {
                if let Err(e) = self.target.push(automation_id, &active.definition_text).await {
                    tracing::error!(
                        automation_id,
                        version_number = active.version_number,
                        error = %e,
                        "Failed to restore active version"
                    );
                }
            }
            Ok(None) => {}
            Err(e) => tracing::error!(automation_id, error = %e, "Failed to read active version"),
        }
    }
}

impl std::fmt::Debug for SuggestionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuggestionService")
            .field("client", &self.client)
            .field("safety", &self.safety)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RecordingTarget, StaticCapabilityGateway};
    use async_trait::async_trait;
    use hearth_llm::MockLanguageModel;
    use hearth_storage::{InMemorySuggestionStore, InMemoryVersionStore};
    use hearth_test_utils::assertions::{assert_busy, assert_invariants};
    use hearth_test_utils::fixtures::{
        fast_config, living_room_capabilities, living_room_pattern, suggestion_in_phase,
        LIVING_ROOM_DESCRIPTION, MOTION_LIGHT_YAML,
    };
    use std::time::Duration;

    /// In-memory store whose conditional writes take `delay` to land.
    struct SlowUpdates {
        inner: InMemorySuggestionStore,
        delay: Duration,
    }

    #[async_trait]
    impl SuggestionStore for SlowUpdates {
        async fn insert(&self, suggestion: &Suggestion) -> HearthResult<()> {
            self.inner.insert(suggestion).await
        }

        async fn get(&self, id: SuggestionId) -> HearthResult<Option<Suggestion>> {
            self.inner.get(id).await
        }

        async fn update_if_phase(
            &self,
            suggestion: &Suggestion,
            expected: SuggestionPhase,
        ) -> HearthResult<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.update_if_phase(suggestion, expected).await
        }

        async fn list_by_phase(&self, phase: SuggestionPhase) -> HearthResult<Vec<Suggestion>> {
            self.inner.list_by_phase(phase).await
        }

        async fn delete(&self, id: SuggestionId) -> HearthResult<()> {
            self.inner.delete(id).await
        }
    }

    fn service_with_store(
        store: Arc<dyn SuggestionStore>,
        target: RecordingTarget,
    ) -> SuggestionService {
        SuggestionService::new(
            &fast_config(),
            Arc::new(MockLanguageModel::new()),
            store,
            Arc::new(InMemoryVersionStore::new()),
            Arc::new(StaticCapabilityGateway::from_set(living_room_capabilities())),
            Arc::new(target),
        )
        .unwrap()
    }

    fn service(mock: Arc<MockLanguageModel>, target: RecordingTarget) -> SuggestionService {
        SuggestionService::new(
            &fast_config(),
            mock,
            Arc::new(InMemorySuggestionStore::new()),
            Arc::new(InMemoryVersionStore::new()),
            Arc::new(StaticCapabilityGateway::from_set(living_room_capabilities())),
            Arc::new(target),
        )
        .unwrap()
    }

    #[test]
    fn test_guard_released_on_drop() {
        let service = service(Arc::new(MockLanguageModel::new()), RecordingTarget::new());
        let id = SuggestionId::nil();
        let guard = service.begin(id, "approve").unwrap();
        assert!(service.is_busy(id));
        assert_busy(&service.begin(id, "refine").map(|_| ()));
        drop(guard);
        assert!(!service.is_busy(id));
        assert!(service.begin(id, "refine").is_ok());
    }

    #[tokio::test]
    async fn test_happy_path_to_deployed() {
        let mock = Arc::new(
            MockLanguageModel::new()
                .then_text(LIVING_ROOM_DESCRIPTION)
                .then_text(MOTION_LIGHT_YAML),
        );
        let target = RecordingTarget::new();
        let service = service(mock, target.clone());
        let pattern = living_room_pattern();

        let created = service.create(&pattern).await.unwrap();
        let id = created.suggestion_id;
        service.generate_description(id, &pattern).await.unwrap();
        let compiled = service.approve(id).await.unwrap();
        assert_eq!(compiled.phase, SuggestionPhase::YamlGenerated);
        assert!(compiled.approved_at.is_some());
        assert!(compiled.yaml_generated_at.is_some());

        let deployed = service.deploy(id).await.unwrap();
        assert_eq!(deployed.phase, SuggestionPhase::Deployed);
        assert_eq!(deployed.safety_score, Some(100));
        assert_invariants(&deployed);

        let active = service
            .versions()
            .active(&deployed.automation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(Some(active.version_id), deployed.deployed_version_id);
        assert_eq!(active.suggestion_id, Some(id));
        assert_eq!(
            target.installed(&deployed.automation_id),
            deployed.automation_definition
        );
        assert!(!service.is_busy(id));
    }

    #[tokio::test]
    async fn test_generation_failure_leaves_phase() {
        let mock = Arc::new(MockLanguageModel::new());
        let service = service(mock, RecordingTarget::new());
        let pattern = living_room_pattern();
        let created = service.create(&pattern).await.unwrap();

        let err = service
            .generate_description(created.suggestion_id, &pattern)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HearthError::Pipeline(PipelineError::GenerationFailed { .. })
        ));
        let stored = service.get(created.suggestion_id).await.unwrap();
        assert_eq!(stored, created);
    }

    #[tokio::test]
    async fn test_push_failure_fails_without_version() {
        let mock = Arc::new(
            MockLanguageModel::new()
                .then_text(LIVING_ROOM_DESCRIPTION)
                .then_text(MOTION_LIGHT_YAML),
        );
        let target = RecordingTarget::new();
        let service = service(mock, target.clone());
        let pattern = living_room_pattern();
        let id = service.create(&pattern).await.unwrap().suggestion_id;
        service.generate_description(id, &pattern).await.unwrap();
        service.approve(id).await.unwrap();

        target.fail_next(1);
        let err = service.deploy(id).await.unwrap_err();
        assert!(matches!(
            err,
            HearthError::Pipeline(PipelineError::DeploymentFailed { .. })
        ));

        let failed = service.get(id).await.unwrap();
        assert_eq!(failed.phase, SuggestionPhase::Failed);
        assert_eq!(
            failed.failure.map(|f| f.last_good_phase),
            Some(SuggestionPhase::YamlGenerated)
        );
        assert!(service
            .versions()
            .history(&failed.automation_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_dropped_deploy_still_completes_once() {
        let store = Arc::new(SlowUpdates {
            inner: InMemorySuggestionStore::new(),
            delay: Duration::from_millis(200),
        });
        let target = RecordingTarget::new();
        let service = service_with_store(store.clone(), target.clone());
        let compiled = suggestion_in_phase(SuggestionPhase::YamlGenerated);
        store.insert(&compiled).await.unwrap();
        let id = compiled.suggestion_id;

        let dropped = tokio::time::timeout(Duration::from_millis(50), service.deploy(id)).await;
        assert!(dropped.is_err());
        // The install keeps both claims until it finishes.
        assert_busy(&service.deploy(id).await);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!service.is_busy(id));
        let stored = service.get(id).await.unwrap();
        assert_eq!(stored.phase, SuggestionPhase::Deployed);
        let history = service.versions().history(&compiled.automation_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(stored.deployed_version_id, Some(history[0].version_id));

        let again = service.deploy(id).await.unwrap_err();
        assert!(again.is_invalid_transition());
        assert_eq!(
            service.versions().history(&compiled.automation_id).await.unwrap().len(),
            1
        );
        assert_eq!(target.pushes().len(), 1);
    }

    #[tokio::test]
    async fn test_deploy_reuses_version_recorded_for_suggestion() {
        let store = Arc::new(InMemorySuggestionStore::new());
        let target = RecordingTarget::new();
        let service = service_with_store(store.clone(), target.clone());
        let compiled = suggestion_in_phase(SuggestionPhase::YamlGenerated);
        store.insert(&compiled).await.unwrap();
        let earlier = service
            .versions()
            .deploy(
                &compiled.automation_id,
                MOTION_LIGHT_YAML,
                100,
                Some(compiled.suggestion_id),
            )
            .await
            .unwrap();

        let deployed = service.deploy(compiled.suggestion_id).await.unwrap();
        assert_eq!(deployed.phase, SuggestionPhase::Deployed);
        assert_eq!(deployed.deployed_version_id, Some(earlier.version_id));
        assert_eq!(
            service.versions().history(&compiled.automation_id).await.unwrap(),
            vec![earlier]
        );
        assert!(target.pushes().is_empty());
    }

    #[tokio::test]
    async fn test_automation_claim_blocks_deploy_and_rollback() {
        let store = Arc::new(InMemorySuggestionStore::new());
        let target = RecordingTarget::new();
        let service = service_with_store(store.clone(), target.clone());
        let compiled = suggestion_in_phase(SuggestionPhase::YamlGenerated);
        store.insert(&compiled).await.unwrap();
        let automation_id = compiled.automation_id.clone();

        let claim = service.begin_automation(&automation_id, "deploy").unwrap();
        let rollback = service.rollback(&automation_id).await;
        assert!(matches!(
            rollback,
            Err(HearthError::Pipeline(PipelineError::AutomationBusy { .. }))
        ));
        assert_busy(&service.deploy(compiled.suggestion_id).await);
        assert_eq!(service.get(compiled.suggestion_id).await.unwrap(), compiled);
        assert!(!service.is_busy(compiled.suggestion_id));
        assert!(target.pushes().is_empty());

        drop(claim);
        let deployed = service.deploy(compiled.suggestion_id).await.unwrap();
        assert_eq!(deployed.phase, SuggestionPhase::Deployed);
    }
}
