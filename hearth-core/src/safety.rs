//! Safety assessment result types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a safety finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

/// One finding from the safety rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyIssue {
    pub severity: Severity,
    /// Identifier of the rule that fired
    pub rule: String,
    pub description: String,
}

/// Outcome of scoring a compiled definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyResult {
    /// 0 (dangerous) to 100 (no findings)
    pub score: u8,
    pub issues: Vec<SafetyIssue>,
}

impl SafetyResult {
    pub fn passes(&self, threshold: u8) -> bool {
        self.score >= threshold
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.issues.iter().map(|i| i.severity).max()
    }

    /// One-line summary for failure records and logs.
    pub fn summary(&self) -> String {
        if self.issues.is_empty() {
            return format!("score {}", self.score);
        }
        let details: Vec<String> = self
            .issues
            .iter()
            .map(|i| format!("[{}] {}", i.severity, i.description))
            .collect();
        format!("score {}: {}", self.score, details.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passes_is_inclusive() {
        let result = SafetyResult {
            score: 60,
            issues: vec![],
        };
        assert!(result.passes(60));
        assert!(!result.passes(61));
    }

    #[test]
    fn test_highest_severity_and_summary() {
        let result = SafetyResult {
            score: 30,
            issues: vec![
                SafetyIssue {
                    severity: Severity::Medium,
                    rule: "climate_extreme".to_string(),
                    description: "heating set to 35".to_string(),
                },
                SafetyIssue {
                    severity: Severity::Critical,
                    rule: "security_disabled".to_string(),
                    description: "alarm disarmed".to_string(),
                },
            ],
        };
        assert_eq!(result.highest_severity(), Some(Severity::Critical));
        let summary = result.summary();
        assert!(summary.starts_with("score 30"));
        assert!(summary.contains("[critical] alarm disarmed"));
    }
}
