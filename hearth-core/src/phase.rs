//! Suggestion lifecycle phases and the transition table.
//!
//! # State Transition Diagram
//!
//! ```text
//! DescriptionPending ── GenerateOk ──→ DescriptionReady ── UserApproves ──→ Approved ── CompileOk ──→ YamlGenerated
//!                                        │        ↑                                                    │
//!                                   UserEdits  RefineValid                              SafetyPass ────┼──→ Deployed
//!                                        ↓        │                                                    │
//!                                        Refining ┘ ↺ RefineInvalid / UserEdits          SafetyFail ───┴──→ Failed
//!
//! any non-terminal ── UserCancels ──→ Rejected
//! any non-terminal ── UnrecoverableError ──→ Failed
//! ```
//!
//! `Deployed`, `Rejected` and `Failed` are terminal. Leaving a terminal phase is
//! an `InvalidTransition` error, never a silent no-op.

use crate::{HearthResult, PipelineError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// SUGGESTION PHASE
// ============================================================================

/// Current state of a suggestion in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionPhase {
    /// Created by the pattern detector, no description yet
    DescriptionPending,
    /// Description available, awaiting edits or approval
    DescriptionReady,
    /// A refinement left unresolved capability violations
    Refining,
    /// User approved the description, compilation pending
    Approved,
    /// Automation definition compiled and syntax-checked
    YamlGenerated,
    /// Definition passed the safety gate and was recorded as a version
    Deployed,
    /// User cancelled the suggestion
    Rejected,
    /// Unrecoverable error or safety rejection
    Failed,
}

impl SuggestionPhase {
    pub const ALL: [SuggestionPhase; 8] = [
        SuggestionPhase::DescriptionPending,
        SuggestionPhase::DescriptionReady,
        SuggestionPhase::Refining,
        SuggestionPhase::Approved,
        SuggestionPhase::YamlGenerated,
        SuggestionPhase::Deployed,
        SuggestionPhase::Rejected,
        SuggestionPhase::Failed,
    ];

    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            SuggestionPhase::DescriptionPending => "description_pending",
            SuggestionPhase::DescriptionReady => "description_ready",
            SuggestionPhase::Refining => "refining",
            SuggestionPhase::Approved => "approved",
            SuggestionPhase::YamlGenerated => "yaml_generated",
            SuggestionPhase::Deployed => "deployed",
            SuggestionPhase::Rejected => "rejected",
            SuggestionPhase::Failed => "failed",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, SuggestionPhaseParseError> {
        match s.to_lowercase().as_str() {
            "description_pending" => Ok(SuggestionPhase::DescriptionPending),
            "description_ready" => Ok(SuggestionPhase::DescriptionReady),
            "refining" => Ok(SuggestionPhase::Refining),
            "approved" => Ok(SuggestionPhase::Approved),
            "yaml_generated" => Ok(SuggestionPhase::YamlGenerated),
            "deployed" => Ok(SuggestionPhase::Deployed),
            "rejected" => Ok(SuggestionPhase::Rejected),
            "failed" => Ok(SuggestionPhase::Failed),
            _ => Err(SuggestionPhaseParseError(s.to_string())),
        }
    }

    /// Check if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SuggestionPhase::Deployed | SuggestionPhase::Rejected | SuggestionPhase::Failed
        )
    }

    /// Phases in which a compiled automation definition must be present.
    pub fn carries_definition(&self) -> bool {
        matches!(
            self,
            SuggestionPhase::YamlGenerated | SuggestionPhase::Deployed
        )
    }

    /// Compute the phase reached by applying `transition`.
    ///
    /// Returns `PipelineError::InvalidTransition` when the table has no entry
    /// for `(self, transition)`.
    pub fn next(self, transition: Transition) -> HearthResult<SuggestionPhase> {
        use SuggestionPhase as P;
        use Transition as T;

        let next = match (self, transition) {
            (from, _) if from.is_terminal() => None,
            (P::DescriptionPending, T::GenerateOk) => Some(P::DescriptionReady),
            (P::DescriptionReady, T::UserApproves) => Some(P::Approved),
            (P::DescriptionReady, T::UserEdits) | (P::Refining, T::UserEdits) => {
                Some(P::Refining)
            }
            (P::Refining, T::RefineValid) => Some(P::DescriptionReady),
            (P::Refining, T::RefineInvalid) => Some(P::Refining),
            (P::Approved, T::CompileOk) => Some(P::YamlGenerated),
            (P::YamlGenerated, T::SafetyPass) => Some(P::Deployed),
            (P::YamlGenerated, T::SafetyFail) => Some(P::Failed),
            (_, T::UserCancels) => Some(P::Rejected),
            (_, T::UnrecoverableError) => Some(P::Failed),
            _ => None,
        };

        next.ok_or_else(|| {
            PipelineError::InvalidTransition {
                from: self,
                operation: transition.operation().to_string(),
            }
            .into()
        })
    }
}

impl fmt::Display for SuggestionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for SuggestionPhase {
    type Err = SuggestionPhaseParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid phase string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuggestionPhaseParseError(pub String);

impl fmt::Display for SuggestionPhaseParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid suggestion phase: {}", self.0)
    }
}

impl std::error::Error for SuggestionPhaseParseError {}

// ============================================================================
// TRANSITIONS
// ============================================================================

/// Events that move a suggestion between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    GenerateOk,
    UserApproves,
    UserEdits,
    RefineValid,
    RefineInvalid,
    CompileOk,
    SafetyPass,
    SafetyFail,
    UserCancels,
    UnrecoverableError,
}

impl Transition {
    pub const ALL: [Transition; 10] = [
        Transition::GenerateOk,
        Transition::UserApproves,
        Transition::UserEdits,
        Transition::RefineValid,
        Transition::RefineInvalid,
        Transition::CompileOk,
        Transition::SafetyPass,
        Transition::SafetyFail,
        Transition::UserCancels,
        Transition::UnrecoverableError,
    ];

    /// Human-facing verb used in `InvalidTransition` messages.
    pub fn operation(&self) -> &'static str {
        match self {
            Transition::GenerateOk => "generate a description for",
            Transition::UserApproves => "approve",
            Transition::UserEdits | Transition::RefineValid | Transition::RefineInvalid => {
                "refine"
            }
            Transition::CompileOk => "compile",
            Transition::SafetyPass | Transition::SafetyFail => "deploy",
            Transition::UserCancels => "cancel",
            Transition::UnrecoverableError => "fail",
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
