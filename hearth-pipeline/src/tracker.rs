//! The only writer of suggestion records.
//!
//! Every change goes through [`SuggestionStateTracker::apply`]: the target
//! phase is computed from the transition table, the caller's field updates are
//! applied to a copy, and the copy is written with a compare-and-swap on the
//! phase it was read in. One operation, one write.

use hearth_core::{
    CapabilitySet, FailureRecord, HearthError, HearthResult, RefinementResult, StorageError,
    Suggestion, SuggestionId, SuggestionPhase, Transition,
};
use hearth_storage::SuggestionStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct SuggestionStateTracker {
    store: Arc<dyn SuggestionStore>,
}

impl SuggestionStateTracker {
    pub fn new(store: Arc<dyn SuggestionStore>) -> Self {
        Self { store }
    }

    /// Persist a freshly created suggestion.
    pub async fn create(&self, suggestion: Suggestion) -> HearthResult<Suggestion> {
        self.store.insert(&suggestion).await?;
        tracing::info!(
            suggestion_id = %suggestion.suggestion_id,
            automation_id = %suggestion.automation_id,
            pattern_id = %suggestion.pattern.pattern_id,
            "Suggestion created"
        );
        Ok(suggestion)
    }

    pub async fn load(&self, id: SuggestionId) -> HearthResult<Suggestion> {
        self.store.get(id).await?.ok_or_else(|| {
            HearthError::Storage(StorageError::NotFound {
                entity: "suggestion",
                id: id.to_string(),
            })
        })
    }

    /// Phase reached after `transitions`, without writing anything.
    pub fn target_phase(
        &self,
        suggestion: &Suggestion,
        transitions: &[Transition],
    ) -> HearthResult<SuggestionPhase> {
        transitions
            .iter()
            .try_fold(suggestion.phase, |phase, transition| phase.next(*transition))
    }

    /// Fail fast with `InvalidTransition` before doing any expensive work.
    pub fn ensure(&self, suggestion: &Suggestion, transition: Transition) -> HearthResult<()> {
        self.target_phase(suggestion, &[transition]).map(|_| ())
    }

    /// Apply `transitions` in order and write the result once.
    ///
    /// `update` sets the fields the operation produced. Phase, `updated_at`,
    /// the phase timestamps and the definition/phase invariant are handled
    /// here. On any error the stored record is untouched.
    pub async fn apply<F>(
        &self,
        current: &Suggestion,
        transitions: &[Transition],
        update: F,
    ) -> HearthResult<Suggestion>
    where
        F: FnOnce(&mut Suggestion),
    {
        let next = self.target_phase(current, transitions)?;
        let now = chrono::Utc::now();

        let mut updated = current.clone();
        update(&mut updated);
        updated.phase = next;
        updated.updated_at = now;
        for transition in transitions {
            match transition {
                Transition::GenerateOk => updated.description_generated_at = Some(now),
                Transition::UserApproves => updated.approved_at = Some(now),
                Transition::CompileOk => updated.yaml_generated_at = Some(now),
                _ => {}
            }
        }
        if !next.carries_definition() {
            updated.automation_definition = None;
        }

        self.store.update_if_phase(&updated, current.phase).await?;
        tracing::info!(
            suggestion_id = %updated.suggestion_id,
            from = %current.phase,
            to = %next,
            "Suggestion transitioned"
        );
        Ok(updated)
    }

    /// Record one refinement round: `user_edits` then valid or invalid.
    pub async fn record_refinement(
        &self,
        current: &Suggestion,
        result: &RefinementResult,
        capabilities: CapabilitySet,
    ) -> HearthResult<Suggestion> {
        let outcome = if result.validation.is_valid {
            Transition::RefineValid
        } else {
            Transition::RefineInvalid
        };
        self.apply(current, &[Transition::UserEdits, outcome], |s| {
            s.description = result.updated_description.clone();
            s.conversation_history
                .extend(result.appended_history.iter().cloned());
            s.device_capability_snapshot = capabilities;
            s.refinement_count += 1;
        })
        .await
    }

    /// Move to `failed`, keeping where the pipeline can resume from.
    ///
    /// `transition` is `SafetyFail` for a rejected definition and
    /// `UnrecoverableError` otherwise.
    pub async fn fail<F>(
        &self,
        current: &Suggestion,
        transition: Transition,
        last_good_phase: SuggestionPhase,
        reason: impl Into<String>,
        update: F,
    ) -> HearthResult<Suggestion>
    where
        F: FnOnce(&mut Suggestion),
    {
        let reason = reason.into();
        tracing::warn!(
            suggestion_id = %current.suggestion_id,
            phase = %current.phase,
            last_good_phase = %last_good_phase,
            reason = %reason,
            "Suggestion failed"
        );
        self.apply(current, &[transition], |s| {
            update(s);
            s.failure = Some(FailureRecord {
                last_good_phase,
                reason,
                failed_at: chrono::Utc::now(),
            });
        })
        .await
    }
}

impl std::fmt::Debug for SuggestionStateTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuggestionStateTracker").finish_non_exhaustive()
    }
}
