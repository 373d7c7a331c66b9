//! Hearth Test Utilities
//!
//! Centralized test infrastructure for the hearth workspace:
//! - Proptest generators for phases, transitions and automation definitions
//! - Fixtures for the living-room / bedroom / alarm scenarios
//! - Canned model outputs for scripting `MockLanguageModel`
//! - Custom assertions for hearth-specific validation

pub use hearth_core::{
    AutomationDefinition, AutomationMode, CapabilitySet, DetectedPattern, DeviceCapability,
    DeviceRef, HearthError, HearthResult, PatternKind, PatternReference, PipelineConfig,
    PipelineError, Suggestion, SuggestionPhase, Transition,
};
pub use hearth_llm::MockLanguageModel;

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating hearth types.

    use super::*;
    use proptest::prelude::*;
    use serde_yaml::{Mapping, Value};

    /// Generate any phase.
    pub fn arb_phase() -> impl Strategy<Value = SuggestionPhase> {
        proptest::sample::select(SuggestionPhase::ALL.to_vec())
    }

    /// Generate a phase that accepts further transitions.
    pub fn arb_non_terminal_phase() -> impl Strategy<Value = SuggestionPhase> {
        arb_phase().prop_filter("non-terminal", |p| !p.is_terminal())
    }

    /// Generate one of `deployed`, `rejected`, `failed`.
    pub fn arb_terminal_phase() -> impl Strategy<Value = SuggestionPhase> {
        prop_oneof![
            Just(SuggestionPhase::Deployed),
            Just(SuggestionPhase::Rejected),
            Just(SuggestionPhase::Failed),
        ]
    }

    /// Generate any transition event.
    pub fn arb_transition() -> impl Strategy<Value = Transition> {
        proptest::sample::select(Transition::ALL.to_vec())
    }

    /// Generate a non-empty free-text user edit.
    pub fn arb_user_edit() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("make it blue".to_string()),
            Just("only on weekdays".to_string()),
            Just("dim it to 30%".to_string()),
            Just("fade in slowly".to_string()),
            Just("turn it off at 11pm".to_string()),
            "[a-z]{3,12}( [a-z]{2,10}){0,5}",
        ]
    }

    const SERVICES: &[&str] = &[
        "light.turn_on",
        "light.turn_off",
        "switch.turn_on",
        "notify.notify",
        "lock.lock",
        "lock.unlock",
        "alarm_control_panel.alarm_disarm",
        "alarm_control_panel.alarm_arm_away",
        "climate.set_temperature",
        "automation.turn_off",
        "shell_command.reboot",
    ];

    const NAMES: &[&str] = &["living_room", "bedroom", "front_door", "home", "porch"];

    fn mapping(pairs: Vec<(&str, Value)>) -> Value {
        let mut map = Mapping::new();
        for (key, value) in pairs {
            map.insert(Value::from(key), value);
        }
        Value::Mapping(map)
    }

    /// Generate a single service-call action step.
    pub fn arb_service_step() -> impl Strategy<Value = Value> {
        (
            proptest::sample::select(SERVICES.to_vec()),
            proptest::sample::select(NAMES.to_vec()),
            5i64..40,
        )
            .prop_map(|(service, name, temperature)| {
                let domain = service.split('.').next().unwrap_or("light");
                let target_domain = match domain {
                    "automation" => "alarm_control_panel",
                    "shell_command" | "notify" => "light",
                    other => other,
                };
                let mut pairs = vec![
                    ("service", Value::from(service)),
                    (
                        "target",
                        mapping(vec![(
                            "entity_id",
                            Value::from(format!("{}.{}", target_domain, name)),
                        )]),
                    ),
                ];
                if service == "climate.set_temperature" {
                    pairs.push(("data", mapping(vec![("temperature", Value::from(temperature))])));
                }
                mapping(pairs)
            })
    }

    /// Generate an action step, sometimes wrapped in a repeat block.
    pub fn arb_action_step() -> impl Strategy<Value = Value> {
        prop_oneof![
            4 => arb_service_step(),
            1 => (arb_service_step(), 1i64..200).prop_map(|(step, count)| {
                mapping(vec![(
                    "repeat",
                    mapping(vec![
                        ("count", Value::from(count)),
                        ("sequence", Value::Sequence(vec![step])),
                    ]),
                )])
            }),
            1 => arb_service_step().prop_map(|step| {
                mapping(vec![(
                    "repeat",
                    mapping(vec![
                        (
                            "while",
                            Value::Sequence(vec![mapping(vec![
                                ("condition", Value::from("state")),
                                ("entity_id", Value::from("binary_sensor.living_room_motion")),
                                ("state", Value::from("on")),
                            ])]),
                        ),
                        ("sequence", Value::Sequence(vec![step])),
                    ]),
                )])
            }),
        ]
    }

    /// Generate a state trigger, with or without a target state.
    pub fn arb_trigger() -> impl Strategy<Value = Value> {
        (proptest::sample::select(NAMES.to_vec()), any::<bool>()).prop_map(|(name, with_to)| {
            let mut pairs = vec![
                ("platform", Value::from("state")),
                ("entity_id", Value::from(format!("binary_sensor.{}_motion", name))),
            ];
            if with_to {
                pairs.push(("to", Value::from("on")));
            }
            mapping(pairs)
        })
    }

    /// Generate a structurally valid automation definition.
    pub fn arb_automation_definition() -> impl Strategy<Value = AutomationDefinition> {
        (
            prop::collection::vec(arb_trigger(), 1..3),
            any::<bool>(),
            prop_oneof![
                Just(AutomationMode::Single),
                Just(AutomationMode::Restart),
                Just(AutomationMode::Queued),
                Just(AutomationMode::Parallel),
            ],
            proptest::option::of(1u32..20),
            prop::collection::vec(arb_action_step(), 1..4),
        )
            .prop_map(|(trigger, with_condition, mode, max, action)| {
                let condition = if with_condition {
                    vec![mapping(vec![
                        ("condition", Value::from("time")),
                        ("after", Value::from("18:00:00")),
                    ])]
                } else {
                    Vec::new()
                };
                AutomationDefinition {
                    id: Some("generated".to_string()),
                    alias: "Generated automation".to_string(),
                    description: None,
                    mode,
                    max,
                    trigger,
                    condition,
                    action,
                }
            })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;
    use hearth_core::{
        FEATURE_BRIGHTNESS, FEATURE_COLOR, FEATURE_COLOR_TEMP, FEATURE_EFFECT, FEATURE_FLASH,
        FEATURE_TRANSITION,
    };
    use std::time::Duration;

    pub const LIVING_ROOM_LIGHT: &str = "light.living_room";
    pub const BEDROOM_LIGHT: &str = "light.bedroom";
    pub const HOME_ALARM: &str = "alarm_control_panel.home";

    /// Motion in the Living Room after 6pm turns the light on at 50%.
    pub fn living_room_pattern() -> DetectedPattern {
        DetectedPattern {
            pattern_id: "pattern-living-room-evening-motion".to_string(),
            kind: PatternKind::CoOccurrence,
            trigger_device: DeviceRef::new(
                "binary_sensor.living_room_motion",
                "Living Room Motion Sensor",
            )
            .in_area("Living Room"),
            action_devices: vec![
                DeviceRef::new(LIVING_ROOM_LIGHT, "Living Room Light").in_area("Living Room")
            ],
            trigger_condition: "motion is detected after 6pm".to_string(),
            observed_action: "the light is turned on at 50% brightness".to_string(),
            confidence: 0.87,
            occurrences: 23,
        }
    }

    /// Opening the bedroom door turns on a white-only bedroom light.
    pub fn bedroom_pattern() -> DetectedPattern {
        DetectedPattern {
            pattern_id: "pattern-bedroom-door-light".to_string(),
            kind: PatternKind::Sequence,
            trigger_device: DeviceRef::new("binary_sensor.bedroom_door", "Bedroom Door")
                .in_area("Bedroom"),
            action_devices: vec![DeviceRef::new(BEDROOM_LIGHT, "Bedroom Light").in_area("Bedroom")],
            trigger_condition: "the bedroom door opens after sunset".to_string(),
            observed_action: "the light is turned on".to_string(),
            confidence: 0.74,
            occurrences: 12,
        }
    }

    /// Living-room motion is followed by the home alarm being disarmed.
    pub fn alarm_pattern() -> DetectedPattern {
        DetectedPattern {
            pattern_id: "pattern-living-room-motion-alarm".to_string(),
            kind: PatternKind::Sequence,
            trigger_device: DeviceRef::new(
                "binary_sensor.living_room_motion",
                "Living Room Motion Sensor",
            )
            .in_area("Living Room"),
            action_devices: vec![DeviceRef::new(HOME_ALARM, "Home Alarm")],
            trigger_condition: "motion is detected".to_string(),
            observed_action: "the alarm is disarmed".to_string(),
            confidence: 0.61,
            occurrences: 9,
        }
    }

    /// Full-colour dimmable light.
    pub fn living_room_light() -> DeviceCapability {
        DeviceCapability::new(LIVING_ROOM_LIGHT, "Living Room Light", "light")
            .with_area("Living Room")
            .with_feature(FEATURE_BRIGHTNESS, true)
            .with_feature(FEATURE_COLOR, true)
            .with_feature(FEATURE_COLOR_TEMP, true)
            .with_feature(FEATURE_TRANSITION, true)
            .with_feature(FEATURE_EFFECT, false)
            .with_feature(FEATURE_FLASH, false)
            .with_friendly_capability("Adjustable brightness")
            .with_friendly_capability("Full colour")
    }

    /// Dimmable white-only light (no RGB).
    pub fn bedroom_light() -> DeviceCapability {
        DeviceCapability::new(BEDROOM_LIGHT, "Bedroom Light", "light")
            .with_area("Bedroom")
            .with_feature(FEATURE_BRIGHTNESS, true)
            .with_feature(FEATURE_COLOR, false)
            .with_feature(FEATURE_COLOR_TEMP, false)
            .with_feature(FEATURE_TRANSITION, true)
            .with_friendly_capability("Adjustable brightness")
    }

    /// Motion or contact sensor: no controllable features.
    pub fn sensor(entity_id: &str, friendly_name: &str, area: &str) -> DeviceCapability {
        DeviceCapability::new(entity_id, friendly_name, "binary_sensor").with_area(area)
    }

    /// Every device of the living-room pattern.
    pub fn living_room_capabilities() -> CapabilitySet {
        CapabilitySet::new(vec![
            sensor(
                "binary_sensor.living_room_motion",
                "Living Room Motion Sensor",
                "Living Room",
            ),
            living_room_light(),
        ])
    }

    /// Every device of the alarm pattern.
    pub fn alarm_capabilities() -> CapabilitySet {
        CapabilitySet::new(vec![
            sensor(
                "binary_sensor.living_room_motion",
                "Living Room Motion Sensor",
                "Living Room",
            ),
            DeviceCapability::new(HOME_ALARM, "Home Alarm", "alarm_control_panel")
                .with_friendly_capability("Arm and disarm"),
        ])
    }

    /// Every device of the bedroom pattern.
    pub fn bedroom_capabilities() -> CapabilitySet {
        CapabilitySet::new(vec![
            sensor("binary_sensor.bedroom_door", "Bedroom Door", "Bedroom"),
            bedroom_light(),
        ])
    }

    /// A fresh suggestion for the living-room pattern.
    pub fn living_room_suggestion() -> Suggestion {
        let reference = PatternReference::from(&living_room_pattern());
        let automation_id = Suggestion::automation_id_for(&reference);
        Suggestion::new(reference, automation_id)
    }

    /// A fresh suggestion for the bedroom pattern.
    pub fn bedroom_suggestion() -> Suggestion {
        let reference = PatternReference::from(&bedroom_pattern());
        let automation_id = Suggestion::automation_id_for(&reference);
        Suggestion::new(reference, automation_id)
    }

    /// A suggestion moved directly into `phase` with consistent fields.
    pub fn suggestion_in_phase(phase: SuggestionPhase) -> Suggestion {
        let mut suggestion = living_room_suggestion();
        suggestion.phase = phase;
        if phase != SuggestionPhase::DescriptionPending {
            suggestion.description = LIVING_ROOM_DESCRIPTION.to_string();
            suggestion.description_generated_at = Some(suggestion.created_at);
        }
        if phase.carries_definition() {
            suggestion.automation_definition = Some(MOTION_LIGHT_YAML.to_string());
            suggestion.yaml_generated_at = Some(suggestion.created_at);
        }
        suggestion
    }

    /// Configuration with millisecond backoff so retry tests run fast.
    pub fn fast_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.retry.initial_backoff = Duration::from_millis(1);
        config.retry.max_backoff = Duration::from_millis(5);
        config.request_timeout = Duration::from_secs(2);
        config
    }

    // === Canned model outputs ===

    pub const LIVING_ROOM_DESCRIPTION: &str = "When motion is detected in the Living Room after 6pm, \
         the Living Room Light turns on at 50% brightness. It keeps the room lit in the evening \
         without you reaching for a switch.";

    pub const BEDROOM_DESCRIPTION: &str =
        "When the Bedroom Door opens after sunset, the Bedroom Light turns on.";

    /// JSON body the refiner expects from the model.
    pub fn refinement_json(description: &str, violations: &[&str]) -> String {
        serde_json::json!({
            "description": description,
            "validation": {
                "is_valid": violations.is_empty(),
                "violations": violations,
            }
        })
        .to_string()
    }

    /// Motion-activated light with a time condition.
    pub const MOTION_LIGHT_YAML: &str = r#"id: hearth_pattern_living_room_evening_motion
alias: Living Room evening motion light
description: Turn on the Living Room Light at 50% when motion is detected after 6pm
mode: single
trigger:
- platform: state
  entity_id: binary_sensor.living_room_motion
  to: 'on'
condition:
- condition: time
  after: '18:00:00'
action:
- service: light.turn_on
  target:
    entity_id: light.living_room
  data:
    brightness_pct: 50
"#;

    /// Disarms the alarm on any motion change, no conditions.
    pub const ALARM_DISARM_YAML: &str = r#"alias: Disarm alarm on motion
mode: single
trigger:
- platform: state
  entity_id: binary_sensor.living_room_motion
action:
- service: alarm_control_panel.alarm_disarm
  target:
    entity_id: alarm_control_panel.home
"#;

    /// Not an automation definition at all.
    pub const BROKEN_YAML: &str = "alias: [unterminated\ntrigger: {platform: state";
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for hearth-specific validation.

    use super::*;

    /// Assert that a HearthResult is an `InvalidTransition` pipeline error.
    #[track_caller]
    pub fn assert_invalid_transition<T: std::fmt::Debug>(result: &HearthResult<T>) {
        match result {
            Err(HearthError::Pipeline(PipelineError::InvalidTransition { .. })) => {}
            other => panic!("Expected InvalidTransition, got: {:?}", other),
        }
    }

    /// Assert that a HearthResult is a `Busy` or `AutomationBusy` pipeline error.
    #[track_caller]
    pub fn assert_busy<T: std::fmt::Debug>(result: &HearthResult<T>) {
        match result {
            Err(HearthError::Pipeline(
                PipelineError::Busy { .. } | PipelineError::AutomationBusy { .. },
            )) => {}
            other => panic!("Expected Busy, got: {:?}", other),
        }
    }

    /// Assert the record-level invariants of a suggestion.
    #[track_caller]
    pub fn assert_invariants(suggestion: &Suggestion) {
        if let Err(reason) = suggestion.check_invariants() {
            panic!("Suggestion invariant violated: {}", reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_fixture_yaml_parses() {
        assert!(AutomationDefinition::from_yaml(MOTION_LIGHT_YAML).is_ok());
        assert!(AutomationDefinition::from_yaml(ALARM_DISARM_YAML).is_ok());
        assert!(AutomationDefinition::from_yaml(BROKEN_YAML).is_err());
    }

    #[test]
    fn test_phase_fixtures_hold_invariants() {
        for phase in SuggestionPhase::ALL {
            assertions::assert_invariants(&suggestion_in_phase(phase));
        }
    }

    #[test]
    fn test_bedroom_light_has_no_color() {
        let caps = bedroom_capabilities();
        assert!(!caps.supports("color"));
        assert!(caps.supports("brightness"));
        assert!(fast_config().validate().is_ok());
    }
}
