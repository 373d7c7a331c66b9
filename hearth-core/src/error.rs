//! Error types for hearth operations

use crate::{SuggestionId, SuggestionPhase};
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Insert failed for {entity}: {reason}")]
    InsertFailed { entity: &'static str, reason: String },

    #[error("Update failed for {entity} with id {id}: {reason}")]
    UpdateFailed {
        entity: &'static str,
        id: String,
        reason: String,
    },

    #[error("Concurrent update on suggestion {id}: expected phase {expected}, found {found}")]
    Conflict {
        id: SuggestionId,
        expected: SuggestionPhase,
        found: SuggestionPhase,
    },

    #[error("Version gap for automation {automation_id}: expected version {expected}, got {got}")]
    VersionGap {
        automation_id: String,
        expected: u32,
        got: u32,
    },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Database error: {reason}")]
    Database { reason: String },

    #[error("Migration {migration} failed: {reason}")]
    MigrationFailed { migration: String, reason: String },
}

/// Language model errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("No language model provider configured")]
    ProviderNotConfigured,

    #[error("Request to {provider} failed with status {status}: {message}")]
    RequestFailed {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Request to {provider} timed out after {elapsed_ms}ms")]
    Timeout { provider: String, elapsed_ms: u64 },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl LlmError {
    /// Whether the failure is worth retrying.
    ///
    /// Timeouts, rate limits, connection failures (status 0) and 5xx responses
    /// are transient. Everything else (auth, malformed prompt) is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Timeout { .. } | LlmError::RateLimited { .. } => true,
            LlmError::RequestFailed { status, .. } => *status == 0 || *status >= 500,
            LlmError::ProviderNotConfigured
            | LlmError::InvalidResponse { .. }
            | LlmError::RetriesExhausted { .. } => false,
        }
    }

    /// Server-supplied delay hint, if any.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            LlmError::RateLimited { retry_after_ms, .. } if *retry_after_ms > 0 => {
                Some(*retry_after_ms)
            }
            _ => None,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Pipeline errors surfaced to callers of the suggestion workflow.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Generation failed after {attempts} attempt(s): {reason}")]
    GenerationFailed { attempts: u32, reason: String },

    #[error("Refinement edit is empty")]
    EmptyEdit,

    #[error("Refinement references unsupported capabilities: {}", violations.join(", "))]
    ValidationFailed { violations: Vec<String> },

    #[error("Automation compilation failed: {reason}")]
    CompilationFailed { reason: String },

    #[error("Safety score {score} is below threshold {threshold}")]
    SafetyRejected { score: u8, threshold: u8 },

    #[error("Cannot {operation} a suggestion in phase {from}")]
    InvalidTransition {
        from: SuggestionPhase,
        operation: String,
    },

    #[error("Suggestion {suggestion_id} already has an operation in flight")]
    Busy { suggestion_id: SuggestionId },

    #[error("Automation {automation_id} is being deployed or rolled back")]
    AutomationBusy { automation_id: String },

    #[error("Capability lookup failed for {entity_id}: {reason}")]
    CapabilityLookupFailed { entity_id: String, reason: String },

    #[error("Deployment of automation {automation_id} failed: {reason}")]
    DeploymentFailed {
        automation_id: String,
        reason: String,
    },
}

/// Master error type for all hearth errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HearthError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

impl HearthError {
    /// Borrow the pipeline error, if this is one.
    pub fn as_pipeline(&self) -> Option<&PipelineError> {
        match self {
            HearthError::Pipeline(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            HearthError::Pipeline(PipelineError::Busy { .. } | PipelineError::AutomationBusy { .. })
        )
    }

    pub fn is_invalid_transition(&self) -> bool {
        matches!(
            self,
            HearthError::Pipeline(PipelineError::InvalidTransition { .. })
        )
    }
}

/// Result type alias for hearth operations.
pub type HearthResult<T> = Result<T, HearthError>;

// =============================================================================
// TESTS
// =============================================================================
