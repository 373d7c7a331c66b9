//! Hearth Storage
//!
//! Async storage traits for suggestions and automation versions, with an
//! in-memory implementation for tests and a PostgreSQL implementation for
//! deployments.

use async_trait::async_trait;
use hearth_core::{
    AutomationVersion, HearthResult, Suggestion, SuggestionId, SuggestionPhase, VersionId,
};

pub mod memory;
pub mod migrations;
pub mod postgres;

pub use memory::{InMemorySuggestionStore, InMemoryVersionStore};
pub use migrations::{run_migrations, Migration, MigrationReport, MIGRATIONS};
pub use postgres::{DbConfig, PgStore};

// ============================================================================
// SUGGESTION STORE
// ============================================================================

/// Persistence for suggestion records.
///
/// Only the state tracker writes through this trait. Writes are
/// compare-and-swap on the phase so two writers can never both advance the
/// same suggestion.
#[async_trait]
pub trait SuggestionStore: Send + Sync {
    /// Insert a new suggestion. Fails if the id already exists.
    async fn insert(&self, suggestion: &Suggestion) -> HearthResult<()>;

    /// Get a suggestion by ID.
    async fn get(&self, id: SuggestionId) -> HearthResult<Option<Suggestion>>;

    /// Replace the stored record if its phase still equals `expected`.
    ///
    /// Returns `StorageError::Conflict` when another writer moved the phase,
    /// `StorageError::NotFound` when the record is gone.
    async fn update_if_phase(
        &self,
        suggestion: &Suggestion,
        expected: SuggestionPhase,
    ) -> HearthResult<()>;

    /// List suggestions currently in `phase`, oldest first.
    async fn list_by_phase(&self, phase: SuggestionPhase) -> HearthResult<Vec<Suggestion>>;

    /// Delete a suggestion (archival happens outside the pipeline).
    async fn delete(&self, id: SuggestionId) -> HearthResult<()>;
}

// ============================================================================
// VERSION STORE
// ============================================================================

/// Append-only history of deployed automation definitions.
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Append a version and make it the active one.
    ///
    /// `version.version_number` must be exactly one more than the latest
    /// recorded number for the automation (1 for the first), otherwise
    /// `StorageError::VersionGap`.
    async fn append(&self, version: &AutomationVersion) -> HearthResult<()>;

    /// All versions for an automation ordered by version number.
    async fn list(&self, automation_id: &str) -> HearthResult<Vec<AutomationVersion>>;

    /// Get a version by ID.
    async fn get(&self, version_id: VersionId) -> HearthResult<Option<AutomationVersion>>;

    /// The version currently deployed for an automation.
    async fn active(&self, automation_id: &str) -> HearthResult<Option<AutomationVersion>>;

    /// Move the active pointer to an existing version of the same automation.
    async fn set_active(&self, automation_id: &str, version_id: VersionId) -> HearthResult<()>;
}

/// Next gap-free version number given the latest recorded one.
pub(crate) fn expected_next(latest: Option<u32>) -> u32 {
    latest.map_or(1, |n| n + 1)
}
