//! Versioned deployment records and rollback.

use hearth_core::{AutomationVersion, HearthError, HearthResult, StorageError, SuggestionId};
use hearth_storage::VersionStore;
use std::sync::Arc;

/// Records deployed definitions and moves the active pointer on rollback.
///
/// History is append-only. Rollback never deletes a version; it re-points the
/// automation at the version immediately preceding the active one.
#[derive(Clone)]
pub struct VersionManager {
    store: Arc<dyn VersionStore>,
}

impl VersionManager {
    pub fn new(store: Arc<dyn VersionStore>) -> Self {
        Self { store }
    }

    /// Append the next version for `automation_id` and make it active.
    ///
    /// Only call this after the definition passed the safety gate.
    pub async fn deploy(
        &self,
        automation_id: &str,
        definition_text: &str,
        safety_score: u8,
        suggestion_id: Option<SuggestionId>,
    ) -> HearthResult<AutomationVersion> {
        let latest = self
            .store
            .list(automation_id)
            .await?
            .last()
            .map(|v| v.version_number);
        let number = latest.map_or(1, |n| n + 1);

        let mut version =
            AutomationVersion::new(automation_id, number, definition_text, safety_score);
        if let Some(id) = suggestion_id {
            version = version.from_suggestion(id);
        }
        self.store.append(&version).await?;

        tracing::info!(
            automation_id,
            version_id = %version.version_id,
            version_number = number,
            safety_score,
            "Automation version recorded"
        );
        Ok(version)
    }

    /// The version immediately preceding the active one, without moving anything.
    ///
    /// `StorageError::NotFound` when there is no active version or it is the
    /// first one.
    pub async fn previous(&self, automation_id: &str) -> HearthResult<AutomationVersion> {
        let not_found = || {
            HearthError::Storage(StorageError::NotFound {
                entity: "previous automation_version",
                id: automation_id.to_string(),
            })
        };

        let active = self.store.active(automation_id).await?.ok_or_else(not_found)?;
        self.store
            .list(automation_id)
            .await?
            .into_iter()
            .filter(|v| v.version_number < active.version_number)
            .max_by_key(|v| v.version_number)
            .ok_or_else(not_found)
    }

    /// Re-activate the version before the active one.
    pub async fn rollback(&self, automation_id: &str) -> HearthResult<AutomationVersion> {
        let previous = self.previous(automation_id).await?;
        self.store
            .set_active(automation_id, previous.version_id)
            .await?;
        tracing::info!(
            automation_id,
            version_id = %previous.version_id,
            to_version = previous.version_number,
            "Automation rolled back"
        );
        Ok(previous)
    }

    pub async fn active(&self, automation_id: &str) -> HearthResult<Option<AutomationVersion>> {
        self.store.active(automation_id).await
    }

    /// Every recorded version, oldest first.
    pub async fn history(&self, automation_id: &str) -> HearthResult<Vec<AutomationVersion>> {
        self.store.list(automation_id).await
    }
}

impl std::fmt::Debug for VersionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionManager").finish_non_exhaustive()
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use hearth_storage::InMemoryVersionStore;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_rollback_is_exact(first in "[ -~\n]{0,200}", second in "[ -~\n]{0,200}") {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let manager = VersionManager::new(Arc::new(InMemoryVersionStore::new()));
                manager.deploy("auto", &first, 90, None).await.unwrap();
                manager.deploy("auto", &second, 90, None).await.unwrap();
                manager.rollback("auto").await.unwrap();
                let active = manager.active("auto").await.unwrap().unwrap();
                assert_eq!(active.definition_text.as_bytes(), first.as_bytes());
            });
        }
    }
}
