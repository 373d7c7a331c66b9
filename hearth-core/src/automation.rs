//! Home Assistant automation definitions.
//!
//! The definition is kept close to the platform's native YAML: the top-level
//! fields are typed, trigger/condition/action blocks stay as YAML values so
//! that anything the platform accepts survives a round trip.

use crate::CapabilitySet;
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::{Mapping, Value};
use thiserror::Error;

/// Keys that make a mapping a recognisable action step.
const ACTION_KEYS: &[&str] = &[
    "service",
    "action",
    "delay",
    "wait_template",
    "wait_for_trigger",
    "choose",
    "repeat",
    "if",
    "parallel",
    "sequence",
    "event",
    "scene",
    "condition",
    "stop",
    "variables",
    "device_id",
];

/// Entity id values the platform treats as keywords rather than devices.
const ENTITY_KEYWORDS: &[&str] = &["all", "none"];

/// Keys that hold nested action lists.
const NESTED_ACTION_KEYS: &[&str] = &["sequence", "then", "else", "default", "parallel"];

/// Execution mode of an automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AutomationMode {
    #[default]
    Single,
    Restart,
    Queued,
    Parallel,
}

/// Structural problems found while parsing a definition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("YAML syntax error: {0}")]
    Syntax(String),

    #[error("automation has no triggers")]
    MissingTriggers,

    #[error("automation has no actions")]
    MissingActions,

    #[error("trigger #{index} is invalid: {reason}")]
    InvalidTrigger { index: usize, reason: String },

    #[error("action #{index} is invalid: {reason}")]
    InvalidAction { index: usize, reason: String },

    #[error("definition does not survive a serialization round trip")]
    RoundTrip,

    #[error("references entities outside the device list: {}", .0.join(", "))]
    UnknownEntities(Vec<String>),
}

/// A compiled automation (trigger / condition / action).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub alias: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub mode: AutomationMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u32>,
    #[serde(alias = "triggers", deserialize_with = "one_or_many")]
    pub trigger: Vec<Value>,
    #[serde(default, alias = "conditions", deserialize_with = "one_or_many")]
    pub condition: Vec<Value>,
    #[serde(alias = "actions", deserialize_with = "one_or_many")]
    pub action: Vec<Value>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => Vec::new(),
        Value::Sequence(items) => items,
        other => vec![other],
    })
}

impl AutomationDefinition {
    /// Parse and structurally validate serialized YAML.
    pub fn from_yaml(text: &str) -> Result<Self, DefinitionError> {
        let definition: AutomationDefinition =
            serde_yaml::from_str(text).map_err(|e| DefinitionError::Syntax(e.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }

    /// Serialize to the platform's YAML syntax.
    pub fn to_yaml(&self) -> Result<String, DefinitionError> {
        serde_yaml::to_string(self).map_err(|e| DefinitionError::Syntax(e.to_string()))
    }

    /// Serialize and confirm the text parses back to the same definition.
    pub fn to_checked_yaml(&self) -> Result<String, DefinitionError> {
        let text = self.to_yaml()?;
        let reparsed = Self::from_yaml(&text)?;
        if &reparsed != self {
            return Err(DefinitionError::RoundTrip);
        }
        Ok(text)
    }

    /// Structural checks the platform's own parser would reject.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.trigger.is_empty() {
            return Err(DefinitionError::MissingTriggers);
        }
        if self.action.is_empty() {
            return Err(DefinitionError::MissingActions);
        }

        for (index, trigger) in self.trigger.iter().enumerate() {
            let map = trigger.as_mapping().ok_or_else(|| DefinitionError::InvalidTrigger {
                index,
                reason: "expected a mapping".to_string(),
            })?;
            let has_platform = ["platform", "trigger"]
                .iter()
                .any(|key| str_field(map, key).is_some());
            if !has_platform {
                return Err(DefinitionError::InvalidTrigger {
                    index,
                    reason: "missing `platform`".to_string(),
                });
            }
        }

        for (index, action) in self.action.iter().enumerate() {
            let map = action.as_mapping().ok_or_else(|| DefinitionError::InvalidAction {
                index,
                reason: "expected a mapping".to_string(),
            })?;
            if !ACTION_KEYS.iter().any(|key| map.contains_key(*key)) {
                return Err(DefinitionError::InvalidAction {
                    index,
                    reason: "no recognised action key".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Every action step, nested ones included, in document order.
    pub fn action_steps(&self) -> Vec<ActionStep<'_>> {
        let mut steps = Vec::new();
        collect_steps(&self.action, 0, &mut steps);
        steps
    }

    pub fn trigger_maps(&self) -> impl Iterator<Item = &Mapping> {
        self.trigger.iter().filter_map(Value::as_mapping)
    }

    pub fn has_conditions(&self) -> bool {
        !self.condition.is_empty()
    }

    /// Entity ids referenced anywhere in triggers, conditions or actions.
    pub fn referenced_entities(&self) -> Vec<String> {
        let mut out = Vec::new();
        for value in self
            .trigger
            .iter()
            .chain(self.condition.iter())
            .chain(self.action.iter())
        {
            collect_entity_ids(value, &mut out);
        }
        out.sort();
        out.dedup();
        out
    }

    /// Reject entity ids that no device in `capabilities` provides.
    pub fn check_entities(&self, capabilities: &CapabilitySet) -> Result<(), DefinitionError> {
        let unknown: Vec<String> = self
            .referenced_entities()
            .into_iter()
            .filter(|id| !ENTITY_KEYWORDS.contains(&id.as_str()))
            .filter(|id| capabilities.device(id).is_none())
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(DefinitionError::UnknownEntities(unknown))
        }
    }
}

/// A single action step with helpers for reading its common fields.
#[derive(Debug, Clone, Copy)]
pub struct ActionStep<'a> {
    pub map: &'a Mapping,
    /// Nesting depth (0 for top-level actions)
    pub depth: usize,
}

impl<'a> ActionStep<'a> {
    /// Service called by this step (`service:` or the newer `action:` key).
    pub fn service(&self) -> Option<&'a str> {
        str_field(self.map, "service")
            .or_else(|| str_field(self.map, "action").filter(|s| s.contains('.')))
    }

    pub fn service_domain(&self) -> Option<&'a str> {
        self.service().and_then(|s| s.split('.').next())
    }

    /// Entity ids targeted via `entity_id`, `target.entity_id` or `data.entity_id`.
    pub fn target_entities(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(v) = self.map.get("entity_id") {
            push_entity_value(v, &mut out);
        }
        for section in ["target", "data"] {
            if let Some(inner) = self.map.get(section).and_then(Value::as_mapping) {
                if let Some(v) = inner.get("entity_id") {
                    push_entity_value(v, &mut out);
                }
            }
        }
        out
    }

    pub fn data(&self) -> Option<&'a Mapping> {
        self.map.get("data").and_then(Value::as_mapping)
    }

    pub fn repeat(&self) -> Option<&'a Mapping> {
        self.map.get("repeat").and_then(Value::as_mapping)
    }
}

fn collect_steps<'a>(actions: &'a [Value], depth: usize, out: &mut Vec<ActionStep<'a>>) {
    for action in actions {
        let Some(map) = action.as_mapping() else {
            continue;
        };
        out.push(ActionStep { map, depth });

        for key in NESTED_ACTION_KEYS {
            if let Some(nested) = map.get(*key) {
                collect_nested(nested, depth + 1, out);
            }
        }
        if let Some(repeat) = map.get("repeat").and_then(Value::as_mapping) {
            if let Some(seq) = repeat.get("sequence") {
                collect_nested(seq, depth + 1, out);
            }
        }
        if let Some(Value::Sequence(options)) = map.get("choose") {
            for option in options {
                if let Some(seq) = option.as_mapping().and_then(|m| m.get("sequence")) {
                    collect_nested(seq, depth + 1, out);
                }
            }
        }
    }
}

fn collect_nested<'a>(value: &'a Value, depth: usize, out: &mut Vec<ActionStep<'a>>) {
    match value {
        Value::Sequence(items) => collect_steps(items, depth, out),
        Value::Mapping(_) => collect_steps(std::slice::from_ref(value), depth, out),
        _ => {}
    }
}

fn collect_entity_ids(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Mapping(map) => {
            for (key, inner) in map {
                if key.as_str() == Some("entity_id") {
                    push_entity_value(inner, out);
                } else {
                    collect_entity_ids(inner, out);
                }
            }
        }
        Value::Sequence(items) => items.iter().for_each(|v| collect_entity_ids(v, out)),
        _ => {}
    }
}

fn push_entity_value(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.extend(
            s.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        ),
        Value::Sequence(items) => {
            for item in items {
                if let Some(s) = item.as_str() {
                    out.push(s.to_string());
                }
            }
        }
        _ => {}
    }
}

pub(crate) fn str_field<'a>(map: &'a Mapping, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str)
}
