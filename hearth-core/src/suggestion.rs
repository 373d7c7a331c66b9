//! The suggestion record and its conversation history.

use crate::{
    new_entity_id, CapabilitySet, PatternReference, SafetyIssue, SuggestionId, SuggestionPhase,
    Timestamp, VersionId,
};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// CONVERSATION HISTORY
// ============================================================================

/// Who produced a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    User,
    System,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::User => write!(f, "user"),
            Actor::System => write!(f, "system"),
        }
    }
}

/// One turn in the refinement conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub actor: Actor,
    pub text: String,
    pub timestamp: Timestamp,
}

impl HistoryEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            actor: Actor::User,
            text: text.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            actor: Actor::System,
            text: text.into(),
            timestamp: chrono::Utc::now(),
        }
    }
}

// ============================================================================
// REFINEMENT RESULT
// ============================================================================

/// Capability validation of a refined description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    /// Capability names referenced but unsupported
    #[serde(default)]
    pub violations: Vec<String>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            violations: Vec::new(),
        }
    }

    pub fn with_violations(violations: Vec<String>) -> Self {
        Self {
            is_valid: violations.is_empty(),
            violations,
        }
    }
}

/// Output of one refinement round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinementResult {
    pub updated_description: String,
    pub validation: ValidationResult,
    /// Exactly one user entry followed by one system entry
    pub appended_history: Vec<HistoryEntry>,
}

// ============================================================================
// FAILURE RECORD
// ============================================================================

/// Why a suggestion ended in `failed`, and where it can be resumed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub last_good_phase: SuggestionPhase,
    pub reason: String,
    pub failed_at: Timestamp,
}

// ============================================================================
// SUGGESTION
// ============================================================================

/// A candidate automation moving through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub suggestion_id: SuggestionId,
    pub pattern: PatternReference,
    /// Stable id of the automation this suggestion deploys to
    pub automation_id: String,
    pub description: String,
    /// Compiled YAML; present only in `yaml_generated` and `deployed`
    pub automation_definition: Option<String>,
    pub conversation_history: Vec<HistoryEntry>,
    pub device_capability_snapshot: CapabilitySet,
    pub refinement_count: u32,
    pub phase: SuggestionPhase,
    pub safety_score: Option<u8>,
    #[serde(default)]
    pub safety_issues: Vec<SafetyIssue>,
    pub deployed_version_id: Option<VersionId>,
    pub failure: Option<FailureRecord>,
    pub description_generated_at: Option<Timestamp>,
    pub approved_at: Option<Timestamp>,
    pub yaml_generated_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Suggestion {
    /// Create a fresh suggestion in `description_pending`.
    pub fn new(pattern: PatternReference, automation_id: impl Into<String>) -> Self {
        let now = chrono::Utc::now();
        Self {
            suggestion_id: new_entity_id(),
            pattern,
            automation_id: automation_id.into(),
            description: String::new(),
            automation_definition: None,
            conversation_history: Vec::new(),
            device_capability_snapshot: CapabilitySet::default(),
            refinement_count: 0,
            phase: SuggestionPhase::DescriptionPending,
            safety_score: None,
            safety_issues: Vec::new(),
            deployed_version_id: None,
            failure: None,
            description_generated_at: None,
            approved_at: None,
            yaml_generated_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Default automation id derived from the originating pattern.
    pub fn automation_id_for(pattern: &PatternReference) -> String {
        let slug: String = pattern
            .pattern_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("hearth_{}", slug)
    }

    /// Check the record-level invariants.
    ///
    /// - `automation_definition` is set iff the phase carries a definition
    /// - history holds at least two entries per refinement
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.automation_definition.is_some() != self.phase.carries_definition() {
            return Err(format!(
                "automation_definition present={} in phase {}",
                self.automation_definition.is_some(),
                self.phase
            ));
        }
        if (self.conversation_history.len() as u64) < u64::from(self.refinement_count) * 2 {
            return Err(format!(
                "{} history entries for {} refinements",
                self.conversation_history.len(),
                self.refinement_count
            ));
        }
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}
