//! In-memory stores for tests and single-process use.

use crate::{expected_next, SuggestionStore, VersionStore};
use async_trait::async_trait;
use hearth_core::{
    AutomationVersion, HearthError, HearthResult, StorageError, Suggestion, SuggestionId,
    SuggestionPhase, VersionId,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

fn poisoned<T>(_: T) -> HearthError {
    HearthError::Storage(StorageError::LockPoisoned)
}

// ============================================================================
// SUGGESTIONS
// ============================================================================

/// Suggestion store backed by a `HashMap`.
#[derive(Debug, Clone, Default)]
pub struct InMemorySuggestionStore {
    suggestions: Arc<RwLock<HashMap<SuggestionId, Suggestion>>>,
}

impl InMemorySuggestionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.suggestions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SuggestionStore for InMemorySuggestionStore {
    async fn insert(&self, suggestion: &Suggestion) -> HearthResult<()> {
        let mut suggestions = self.suggestions.write().map_err(poisoned)?;
        if suggestions.contains_key(&suggestion.suggestion_id) {
            return Err(HearthError::Storage(StorageError::InsertFailed {
                entity: "suggestion",
                reason: "already exists".to_string(),
            }));
        }
        suggestions.insert(suggestion.suggestion_id, suggestion.clone());
        Ok(())
    }

    async fn get(&self, id: SuggestionId) -> HearthResult<Option<Suggestion>> {
        let suggestions = self.suggestions.read().map_err(poisoned)?;
        Ok(suggestions.get(&id).cloned())
    }

    async fn update_if_phase(
        &self,
        suggestion: &Suggestion,
        expected: SuggestionPhase,
    ) -> HearthResult<()> {
        suggestion.check_invariants().map_err(|reason| {
            HearthError::Storage(StorageError::UpdateFailed {
                entity: "suggestion",
                id: suggestion.suggestion_id.to_string(),
                reason,
            })
        })?;

        let mut suggestions = self.suggestions.write().map_err(poisoned)?;
        let stored = suggestions
            .get_mut(&suggestion.suggestion_id)
            .ok_or_else(|| {
                HearthError::Storage(StorageError::NotFound {
                    entity: "suggestion",
                    id: suggestion.suggestion_id.to_string(),
                })
            })?;

        if stored.phase != expected {
            return Err(HearthError::Storage(StorageError::Conflict {
                id: suggestion.suggestion_id,
                expected,
                found: stored.phase,
            }));
        }

        *stored = suggestion.clone();
        Ok(())
    }

    async fn list_by_phase(&self, phase: SuggestionPhase) -> HearthResult<Vec<Suggestion>> {
        let suggestions = self.suggestions.read().map_err(poisoned)?;
        let mut matching: Vec<Suggestion> = suggestions
            .values()
            .filter(|s| s.phase == phase)
            .cloned()
            .collect();
        matching.sort_by_key(|s| (s.created_at, s.suggestion_id));
        Ok(matching)
    }

    async fn delete(&self, id: SuggestionId) -> HearthResult<()> {
        let mut suggestions = self.suggestions.write().map_err(poisoned)?;
        suggestions
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| {
                HearthError::Storage(StorageError::NotFound {
                    entity: "suggestion",
                    id: id.to_string(),
                })
            })
    }
}

// ============================================================================
// VERSIONS
// ============================================================================

#[derive(Debug, Default)]
struct VersionState {
    /// automation_id -> versions in version_number order
    history: HashMap<String, Vec<AutomationVersion>>,
    /// automation_id -> active version
    active: HashMap<String, VersionId>,
}

/// Version store backed by per-automation vectors.
#[derive(Debug, Clone, Default)]
pub struct InMemoryVersionStore {
    state: Arc<RwLock<VersionState>>,
}

impl InMemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of versions across all automations.
    pub fn version_count(&self) -> usize {
        self.state
            .read()
            .map(|s| s.history.values().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

#[async_trait]
impl VersionStore for InMemoryVersionStore {
    async fn append(&self, version: &AutomationVersion) -> HearthResult<()> {
        let mut state = self.state.write().map_err(poisoned)?;
        let history = state
            .history
            .entry(version.automation_id.clone())
            .or_default();

        let expected = expected_next(history.last().map(|v| v.version_number));
        if version.version_number != expected {
            return Err(HearthError::Storage(StorageError::VersionGap {
                automation_id: version.automation_id.clone(),
                expected,
                got: version.version_number,
            }));
        }

        history.push(version.clone());
        state
            .active
            .insert(version.automation_id.clone(), version.version_id);
        Ok(())
    }

    async fn list(&self, automation_id: &str) -> HearthResult<Vec<AutomationVersion>> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.history.get(automation_id).cloned().unwrap_or_default())
    }

    async fn get(&self, version_id: VersionId) -> HearthResult<Option<AutomationVersion>> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state
            .history
            .values()
            .flatten()
            .find(|v| v.version_id == version_id)
            .cloned())
    }

    async fn active(&self, automation_id: &str) -> HearthResult<Option<AutomationVersion>> {
        let state = self.state.read().map_err(poisoned)?;
        let Some(active_id) = state.active.get(automation_id) else {
            return Ok(None);
        };
        Ok(state
            .history
            .get(automation_id)
            .and_then(|versions| versions.iter().find(|v| v.version_id == *active_id))
            .cloned())
    }

    async fn set_active(&self, automation_id: &str, version_id: VersionId) -> HearthResult<()> {
        let mut state = self.state.write().map_err(poisoned)?;
        let known = state
            .history
            .get(automation_id)
            .is_some_and(|versions| versions.iter().any(|v| v.version_id == version_id));
        if !known {
            return Err(HearthError::Storage(StorageError::NotFound {
                entity: "automation_version",
                id: version_id.to_string(),
            }));
        }
        state.active.insert(automation_id.to_string(), version_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::{PatternReference, Suggestion};

    fn suggestion() -> Suggestion {
        Suggestion::new(
            PatternReference {
                pattern_id: "p1".to_string(),
                entity_ids: vec!["light.porch".to_string()],
            },
            "hearth_p1",
        )
    }

    #[tokio::test]
    async fn test_insert_get_delete() {
        let store = InMemorySuggestionStore::new();
        let s = suggestion();
        store.insert(&s).await.unwrap();
        assert!(store.insert(&s).await.is_err());
        assert_eq!(store.get(s.suggestion_id).await.unwrap(), Some(s.clone()));

        store.delete(s.suggestion_id).await.unwrap();
        assert!(store.get(s.suggestion_id).await.unwrap().is_none());
        assert!(store.delete(s.suggestion_id).await.is_err());
    }

    #[tokio::test]
    async fn test_update_if_phase_conflict() {
        let store = InMemorySuggestionStore::new();
        let mut s = suggestion();
        store.insert(&s).await.unwrap();

        s.phase = SuggestionPhase::DescriptionReady;
        s.description = "Turns on the porch light.".to_string();
        store
            .update_if_phase(&s, SuggestionPhase::DescriptionPending)
            .await
            .unwrap();

        // A second writer still believing the old phase loses.
        let err = store
            .update_if_phase(&s, SuggestionPhase::DescriptionPending)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            HearthError::Storage(StorageError::Conflict {
                id: s.suggestion_id,
                expected: SuggestionPhase::DescriptionPending,
                found: SuggestionPhase::DescriptionReady,
            })
        );
    }

    #[tokio::test]
    async fn test_update_rejects_broken_invariant() {
        let store = InMemorySuggestionStore::new();
        let mut s = suggestion();
        store.insert(&s).await.unwrap();

        s.automation_definition = Some("alias: stray".to_string());
        let err = store
            .update_if_phase(&s, SuggestionPhase::DescriptionPending)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HearthError::Storage(StorageError::UpdateFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_by_phase() {
        let store = InMemorySuggestionStore::new();
        let a = suggestion();
        let mut b = suggestion();
        b.phase = SuggestionPhase::Rejected;
        store.insert(&a).await.unwrap();
        store.insert(&b).await.unwrap();

        let pending = store
            .list_by_phase(SuggestionPhase::DescriptionPending)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].suggestion_id, a.suggestion_id);
    }

    #[tokio::test]
    async fn test_version_append_rejects_gap() {
        let store = InMemoryVersionStore::new();
        store
            .append(&AutomationVersion::new("porch", 1, "alias: v1\n", 90))
            .await
            .unwrap();

        let err = store
            .append(&AutomationVersion::new("porch", 3, "alias: v3\n", 90))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            HearthError::Storage(StorageError::VersionGap {
                automation_id: "porch".to_string(),
                expected: 2,
                got: 3,
            })
        );

        let err = store
            .append(&AutomationVersion::new("garage", 2, "alias: g\n", 90))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HearthError::Storage(StorageError::VersionGap { expected: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_active_pointer_moves_without_deleting() {
        let store = InMemoryVersionStore::new();
        let v1 = AutomationVersion::new("porch", 1, "alias: v1\n", 90);
        let v2 = AutomationVersion::new("porch", 2, "alias: v2\n", 85);
        store.append(&v1).await.unwrap();
        store.append(&v2).await.unwrap();
        assert_eq!(store.active("porch").await.unwrap(), Some(v2.clone()));

        store.set_active("porch", v1.version_id).await.unwrap();
        assert_eq!(store.active("porch").await.unwrap(), Some(v1.clone()));
        assert_eq!(store.list("porch").await.unwrap(), vec![v1.clone(), v2.clone()]);
        assert_eq!(store.get(v2.version_id).await.unwrap(), Some(v2));

        let other = AutomationVersion::new("garage", 1, "alias: g\n", 90);
        store.append(&other).await.unwrap();
        assert!(store.set_active("porch", other.version_id).await.is_err());
    }
}
