//! Rule-based safety scoring of compiled definitions.
//!
//! Every rule is a pure function of the definition. The score starts at 100
//! and each finding subtracts the penalty of its severity, floored at 0.
//!
//! | rule | severity |
//! |---|---|
//! | `security_disabled_unconditionally` | critical |
//! | `security_disabled` (guarded by conditions) | high |
//! | `unconditional_security_action` | high |
//! | `arbitrary_execution` | high |
//! | `unbounded_loop` | high |
//! | `excessive_repeat` | medium |
//! | `unbounded_queue` | medium |
//! | `climate_extreme` | medium |
//! | `targets_all_entities` | medium |
//! | `broad_state_trigger` | low |

use hearth_core::{
    ActionStep, AutomationDefinition, AutomationMode, HearthResult, PipelineConfig, PipelineError,
    SafetyIssue, SafetyResult, Severity,
};
use serde_yaml::{Mapping, Value};

/// Domains whose entities guard the home.
const SECURITY_DOMAINS: &[&str] = &["alarm_control_panel", "lock"];

/// Services that lower protection directly.
const DISARMING_SERVICES: &[&str] = &[
    "alarm_control_panel.alarm_disarm",
    "lock.unlock",
    "lock.open",
];

/// Services that lower protection when aimed at a security entity.
const DISABLING_SERVICES: &[&str] = &[
    "automation.turn_off",
    "homeassistant.turn_off",
    "homeassistant.toggle",
    "switch.turn_off",
];

const EXECUTION_DOMAINS: &[&str] = &["shell_command", "python_script", "pyscript"];

const MAX_REPEAT_COUNT: i64 = 100;
const MIN_SAFE_TEMPERATURE: f64 = 10.0;
const MAX_SAFE_TEMPERATURE: f64 = 30.0;

fn penalty(severity: Severity) -> u32 {
    match severity {
        Severity::Critical => 50,
        Severity::High => 25,
        Severity::Medium => 10,
        Severity::Low => 5,
    }
}

fn issue(severity: Severity, rule: &str, description: String) -> SafetyIssue {
    SafetyIssue {
        severity,
        rule: rule.to_string(),
        description,
    }
}

fn str_of<'a>(map: &'a Mapping, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str)
}

fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn entity_domain(entity_id: &str) -> &str {
    entity_id.split('.').next().unwrap_or(entity_id)
}

/// Scores definitions and gates deployment on the configured threshold.
#[derive(Debug, Clone, Copy)]
pub struct SafetyValidator {
    threshold: u8,
}

impl SafetyValidator {
    pub fn new(config: &PipelineConfig) -> Self {
        Self::with_threshold(config.safety_threshold)
    }

    pub fn with_threshold(threshold: u8) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    /// Score `definition`. Same input, same output.
    pub fn assess(&self, definition: &AutomationDefinition) -> SafetyResult {
        let conditional = definition.has_conditions();
        let mut issues = Vec::new();

        for step in definition.action_steps() {
            check_security(&step, conditional, &mut issues);
            check_execution(&step, &mut issues);
            check_repeat(&step, &mut issues);
            check_climate(&step, &mut issues);
            check_all_entities(&step, &mut issues);
        }
        check_mode(definition, &mut issues);
        if !conditional {
            check_triggers(definition, &mut issues);
        }

        let total: u32 = issues.iter().map(|i| penalty(i.severity)).sum();
        let score = 100u32.saturating_sub(total) as u8;
        SafetyResult { score, issues }
    }

    /// `SafetyRejected` when the result is below the threshold.
    pub fn gate(&self, result: &SafetyResult) -> HearthResult<()> {
        if result.passes(self.threshold) {
            Ok(())
        } else {
            Err(PipelineError::SafetyRejected {
                score: result.score,
                threshold: self.threshold,
            }
            .into())
        }
    }
}

fn check_security(step: &ActionStep<'_>, conditional: bool, issues: &mut Vec<SafetyIssue>) {
    let Some(service) = step.service() else {
        return;
    };
    let targets = step.target_entities();
    let security_targets: Vec<&String> = targets
        .iter()
        .filter(|e| SECURITY_DOMAINS.contains(&entity_domain(e)))
        .collect();

    let disables = DISARMING_SERVICES.contains(&service)
        || (DISABLING_SERVICES.contains(&service) && !security_targets.is_empty());
    if disables {
        if conditional {
            issues.push(issue(
                Severity::High,
                "security_disabled",
                format!("{} lowers home security", service),
            ));
        } else {
            issues.push(issue(
                Severity::Critical,
                "security_disabled_unconditionally",
                format!("{} lowers home security with no conditions", service),
            ));
        }
    }

    let security_service = step
        .service_domain()
        .is_some_and(|domain| SECURITY_DOMAINS.contains(&domain));
    if !conditional && (security_service || !security_targets.is_empty()) {
        issues.push(issue(
            Severity::High,
            "unconditional_security_action",
            format!("{} acts on a security device with no conditions", service),
        ));
    }
}

fn check_execution(step: &ActionStep<'_>, issues: &mut Vec<SafetyIssue>) {
    if let Some(domain) = step.service_domain() {
        if EXECUTION_DOMAINS.contains(&domain) {
            issues.push(issue(
                Severity::High,
                "arbitrary_execution",
                format!("{} runs arbitrary code", step.service().unwrap_or(domain)),
            ));
        }
    }
}

fn check_repeat(step: &ActionStep<'_>, issues: &mut Vec<SafetyIssue>) {
    let Some(repeat) = step.repeat() else {
        return;
    };
    if let Some(count) = repeat.get("count") {
        if let Some(n) = number_of(count) {
            if n > MAX_REPEAT_COUNT as f64 {
                issues.push(issue(
                    Severity::Medium,
                    "excessive_repeat",
                    format!("repeats {} times", n),
                ));
            }
        }
        return;
    }
    let kind = ["while", "until", "for_each"]
        .into_iter()
        .find(|key| repeat.contains_key(*key));
    match kind {
        Some("for_each") => {}
        Some(key) => issues.push(issue(
            Severity::High,
            "unbounded_loop",
            format!("repeat `{}` has no iteration bound", key),
        )),
        None => issues.push(issue(
            Severity::High,
            "unbounded_loop",
            "repeat has no termination condition".to_string(),
        )),
    }
}

fn check_climate(step: &ActionStep<'_>, issues: &mut Vec<SafetyIssue>) {
    if step.service() != Some("climate.set_temperature") {
        return;
    }
    let Some(data) = step.data() else {
        return;
    };
    for key in ["temperature", "target_temp_high", "target_temp_low"] {
        let Some(value) = data.get(key).and_then(number_of) else {
            continue;
        };
        if !(MIN_SAFE_TEMPERATURE..=MAX_SAFE_TEMPERATURE).contains(&value) {
            issues.push(issue(
                Severity::Medium,
                "climate_extreme",
                format!("{} set to {}", key, value),
            ));
        }
    }
}

fn check_all_entities(step: &ActionStep<'_>, issues: &mut Vec<SafetyIssue>) {
    if step.target_entities().iter().any(|e| e == "all") {
        issues.push(issue(
            Severity::Medium,
            "targets_all_entities",
            format!(
                "{} targets every entity",
                step.service().unwrap_or("action")
            ),
        ));
    }
}

fn check_mode(definition: &AutomationDefinition, issues: &mut Vec<SafetyIssue>) {
    let stacking = matches!(
        definition.mode,
        AutomationMode::Queued | AutomationMode::Parallel
    );
    if stacking && definition.max.is_none() {
        issues.push(issue(
            Severity::Medium,
            "unbounded_queue",
            format!("mode {:?} without `max`", definition.mode).to_lowercase(),
        ));
    }
}

fn check_triggers(definition: &AutomationDefinition, issues: &mut Vec<SafetyIssue>) {
    for trigger in definition.trigger_maps() {
        let platform = str_of(trigger, "platform").or_else(|| str_of(trigger, "trigger"));
        if platform != Some("state") {
            continue;
        }
        if trigger.contains_key("to") || trigger.contains_key("from") {
            continue;
        }
        let entity = str_of(trigger, "entity_id").unwrap_or("an entity");
        issues.push(issue(
            Severity::Low,
            "broad_state_trigger",
            format!("fires on every state change of {}", entity),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::HearthError;
    use hearth_test_utils::fixtures::{ALARM_DISARM_YAML, MOTION_LIGHT_YAML};

    fn validator() -> SafetyValidator {
        SafetyValidator::with_threshold(60)
    }

    fn parse(text: &str) -> AutomationDefinition {
        AutomationDefinition::from_yaml(text).unwrap()
    }

    fn rules(result: &SafetyResult) -> Vec<&str> {
        result.issues.iter().map(|i| i.rule.as_str()).collect()
    }

    #[test]
    fn test_motion_light_is_clean() {
        let result = validator().assess(&parse(MOTION_LIGHT_YAML));
        assert_eq!(result.score, 100);
        assert!(result.issues.is_empty());
        assert!(validator().gate(&result).is_ok());
    }

    #[test]
    fn test_unconditional_alarm_disarm_is_rejected() {
        let result = validator().assess(&parse(ALARM_DISARM_YAML));
        assert_eq!(
            rules(&result),
            vec![
                "security_disabled_unconditionally",
                "unconditional_security_action",
                "broad_state_trigger"
            ]
        );
        assert_eq!(result.score, 20);
        assert_eq!(result.highest_severity(), Some(Severity::Critical));

        let err = validator().gate(&result).unwrap_err();
        assert_eq!(
            err,
            HearthError::Pipeline(PipelineError::SafetyRejected {
                score: 20,
                threshold: 60
            })
        );
    }

    #[test]
    fn test_conditional_unlock_is_high_only() {
        let text = r#"
alias: Unlock when home
trigger:
  - platform: state
    entity_id: person.alex
    to: home
condition:
  - condition: time
    after: "07:00:00"
action:
  - service: lock.unlock
    target:
      entity_id: lock.front_door
"#;
        let result = validator().assess(&parse(text));
        assert_eq!(rules(&result), vec!["security_disabled"]);
        assert_eq!(result.score, 75);
    }

    #[test]
    fn test_automation_turn_off_on_alarm() {
        let text = r#"
alias: Stop the alarm automation
trigger:
  - platform: sun
    event: sunrise
action:
  - service: automation.turn_off
    entity_id: alarm_control_panel.home
"#;
        let result = validator().assess(&parse(text));
        assert!(rules(&result).contains(&"security_disabled_unconditionally"));
    }

    #[test]
    fn test_loops_and_queues() {
        let text = r#"
alias: Loops
mode: queued
trigger:
  - platform: time
    at: "07:00:00"
action:
  - repeat:
      while:
        - condition: state
          entity_id: binary_sensor.door
          state: "on"
      sequence:
        - service: notify.notify
  - repeat:
      count: 500
      sequence:
        - service: light.toggle
          entity_id: light.porch
  - repeat:
      count: 3
      sequence:
        - service: light.toggle
          entity_id: light.porch
"#;
        let result = validator().assess(&parse(text));
        assert_eq!(
            rules(&result),
            vec!["unbounded_loop", "excessive_repeat", "unbounded_queue"]
        );
        assert_eq!(result.score, 100 - 25 - 10 - 10);
    }

    #[test]
    fn test_climate_shell_and_all() {
        let text = r#"
alias: Misc
trigger:
  - platform: time
    at: "07:00:00"
action:
  - service: climate.set_temperature
    target:
      entity_id: climate.hall
    data:
      temperature: 35
  - service: shell_command.reboot
  - service: light.turn_off
    entity_id: all
"#;
        let result = validator().assess(&parse(text));
        assert_eq!(
            rules(&result),
            vec!["climate_extreme", "arbitrary_execution", "targets_all_entities"]
        );
        assert_eq!(result.score, 100 - 10 - 25 - 10);
    }

    #[test]
    fn test_score_floors_at_zero() {
        let text = r#"
alias: Everything bad
trigger:
  - platform: state
    entity_id: binary_sensor.door
action:
  - service: alarm_control_panel.alarm_disarm
    entity_id: alarm_control_panel.home
  - service: lock.unlock
    entity_id: lock.front
  - service: lock.open
    entity_id: lock.back
"#;
        let result = validator().assess(&parse(text));
        assert_eq!(result.score, 0);
    }
}
