//! Hearth Core - Entity Types
//!
//! Data structures shared by every hearth crate: suggestions, phases,
//! capability records, automation definitions, versions and errors.
//! Behaviour that talks to a model, a database or a home lives elsewhere.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Suggestion identifier (UUIDv7, sortable by creation time).
pub type SuggestionId = Uuid;

/// Automation version identifier.
pub type VersionId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// SHA-256 content hash for integrity verification.
pub type ContentHash = [u8; 32];

/// Generate a new UUIDv7 identifier.
pub fn new_entity_id() -> Uuid {
    Uuid::now_v7()
}

/// Compute SHA-256 hash of content.
pub fn compute_content_hash(content: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

// ============================================================================
// MODULES
// ============================================================================

mod automation;
mod capability;
mod config;
mod error;
mod pattern;
mod phase;
mod safety;
mod suggestion;
mod version;

pub use automation::{ActionStep, AutomationDefinition, AutomationMode, DefinitionError};
pub use capability::{
    CapabilitySet, DeviceCapability, FEATURE_BRIGHTNESS, FEATURE_COLOR, FEATURE_COLOR_TEMP,
    FEATURE_EFFECT, FEATURE_FLASH, FEATURE_TRANSITION,
};
pub use config::{GenerationProfile, PipelineConfig, RetryConfig};
pub use error::{
    ConfigError, HearthError, HearthResult, LlmError, PipelineError, StorageError,
};
pub use pattern::{DetectedPattern, DeviceRef, PatternKind, PatternReference};
pub use phase::{SuggestionPhase, SuggestionPhaseParseError, Transition};
pub use safety::{SafetyIssue, SafetyResult, Severity};
pub use suggestion::{
    Actor, FailureRecord, HistoryEntry, RefinementResult, Suggestion, ValidationResult,
};
pub use version::AutomationVersion;

/// Every capability feature name the refiner knows how to detect.
pub const KNOWN_FEATURES: &[&str] = &[
    FEATURE_BRIGHTNESS,
    FEATURE_COLOR,
    FEATURE_COLOR_TEMP,
    FEATURE_TRANSITION,
    FEATURE_EFFECT,
    FEATURE_FLASH,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_stable() {
        let a = compute_content_hash(b"alias: porch");
        let b = compute_content_hash(b"alias: porch");
        let c = compute_content_hash(b"alias: porch ");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_entity_ids_sort_by_creation() {
        let first = new_entity_id();
        let second = new_entity_id();
        assert!(first <= second);
    }
}
