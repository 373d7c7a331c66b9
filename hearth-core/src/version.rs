//! Immutable records of deployed automation definitions.

use crate::{compute_content_hash, new_entity_id, SuggestionId, Timestamp, VersionId};
use serde::{Deserialize, Serialize};

/// One deployed definition. Never mutated, only superseded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationVersion {
    pub version_id: VersionId,
    /// Stable identifier of the target automation (not the suggestion id)
    pub automation_id: String,
    /// 1-based, gap-free per automation
    pub version_number: u32,
    pub definition_text: String,
    /// SHA-256 of `definition_text`, hex encoded
    pub content_hash: String,
    pub safety_score: u8,
    /// Suggestion that produced this version
    pub suggestion_id: Option<SuggestionId>,
    pub deployed_at: Timestamp,
}

impl AutomationVersion {
    pub fn new(
        automation_id: impl Into<String>,
        version_number: u32,
        definition_text: impl Into<String>,
        safety_score: u8,
    ) -> Self {
        let definition_text = definition_text.into();
        let content_hash = hex::encode(compute_content_hash(definition_text.as_bytes()));
        Self {
            version_id: new_entity_id(),
            automation_id: automation_id.into(),
            version_number,
            definition_text,
            content_hash,
            safety_score,
            suggestion_id: None,
            deployed_at: chrono::Utc::now(),
        }
    }

    pub fn from_suggestion(mut self, suggestion_id: SuggestionId) -> Self {
        self.suggestion_id = Some(suggestion_id);
        self
    }

    /// Recompute the hash and compare with the stored one.
    pub fn verify_integrity(&self) -> bool {
        hex::encode(compute_content_hash(self.definition_text.as_bytes())) == self.content_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_version_hashes_definition() {
        let version = AutomationVersion::new("porch_light", 1, "alias: porch\n", 95);
        assert_eq!(version.content_hash.len(), 64);
        assert!(version.verify_integrity());

        let mut tampered = version.clone();
        tampered.definition_text.push(' ');
        assert!(!tampered.verify_integrity());
    }
}
