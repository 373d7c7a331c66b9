//! Detected behavioural patterns, as handed over by the pattern detector.

use serde::{Deserialize, Serialize};

/// Kind of pattern the detector found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Device used at a consistent time of day
    TimeOfDay,
    /// Two devices used together within a short window
    CoOccurrence,
    /// One device state change reliably precedes another
    Sequence,
    /// Usage deviates from the learned baseline
    Anomaly,
}

impl PatternKind {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            PatternKind::TimeOfDay => "time_of_day",
            PatternKind::CoOccurrence => "co_occurrence",
            PatternKind::Sequence => "sequence",
            PatternKind::Anomaly => "anomaly",
        }
    }
}

/// A device taking part in a pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRef {
    pub entity_id: String,
    pub friendly_name: String,
    #[serde(default)]
    pub area: Option<String>,
}

impl DeviceRef {
    pub fn new(entity_id: impl Into<String>, friendly_name: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            friendly_name: friendly_name.into(),
            area: None,
        }
    }

    pub fn in_area(mut self, area: impl Into<String>) -> Self {
        self.area = Some(area.into());
        self
    }
}

/// Structured pattern consumed by the description generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedPattern {
    pub pattern_id: String,
    pub kind: PatternKind,
    /// Device whose state change starts the behaviour
    pub trigger_device: DeviceRef,
    /// Devices acted upon
    pub action_devices: Vec<DeviceRef>,
    /// Trigger condition in plain words ("motion detected after 6pm")
    pub trigger_condition: String,
    /// Observed action in plain words ("light set to 50% brightness")
    pub observed_action: String,
    pub confidence: f64,
    pub occurrences: u32,
}

impl DetectedPattern {
    /// Entity ids of every device involved, trigger first, without duplicates.
    pub fn entity_ids(&self) -> Vec<String> {
        let mut ids = vec![self.trigger_device.entity_id.clone()];
        for device in &self.action_devices {
            if !ids.contains(&device.entity_id) {
                ids.push(device.entity_id.clone());
            }
        }
        ids
    }

    /// Friendly names of every device, for prompts that must not expose entity ids.
    pub fn friendly_names(&self) -> Vec<&str> {
        std::iter::once(&self.trigger_device)
            .chain(self.action_devices.iter())
            .map(|d| d.friendly_name.as_str())
            .collect()
    }
}

/// Link from a suggestion to the pattern that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternReference {
    pub pattern_id: String,
    /// Entities whose capabilities govern refinement
    pub entity_ids: Vec<String>,
}

impl From<&DetectedPattern> for PatternReference {
    fn from(pattern: &DetectedPattern) -> Self {
        Self {
            pattern_id: pattern.pattern_id.clone(),
            entity_ids: pattern.entity_ids(),
        }
    }
}
