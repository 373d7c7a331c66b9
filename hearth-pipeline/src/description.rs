//! Phase 2: pattern to plain-language description.

use crate::generation_failed;
use hearth_core::{DetectedPattern, GenerationProfile, HearthResult, PipelineConfig, PipelineError};
use hearth_llm::{GenerationRequest, ModelClient};
use once_cell::sync::Lazy;
use regex::Regex;

const SYSTEM_INSTRUCTION: &str = "You describe smart home automations to homeowners. \
     Write one or two plain sentences that say what will happen and when. \
     Refer to devices only by the names you are given. \
     Never write YAML, code, entity ids or service names.";

const SYNTAX_FEEDBACK: &str = "That reply contained automation syntax. \
     Answer again with one or two plain English sentences only.";

const LENGTH_FEEDBACK: &str = "That reply was too long. \
     Answer again with at most two plain English sentences.";

const MAX_SENTENCES: usize = 2;

/// Lines that look like automation YAML or a fenced code block.
static AUTOMATION_SYNTAX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)(^\s*-?\s*(trigger|triggers|action|actions|service|platform|entity_id|alias|condition|conditions)\s*:)|```")
        .expect("Invalid automation syntax regex")
});

static SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]+(\s+|$)").expect("Invalid sentence end regex"));

/// Whether generated text resembles an automation definition.
pub fn looks_like_automation_syntax(text: &str) -> bool {
    AUTOMATION_SYNTAX.is_match(text)
}

/// Number of sentences in `text`, split on terminal punctuation.
pub fn sentence_count(text: &str) -> usize {
    SENTENCE_END
        .split(text)
        .filter(|part| !part.trim().is_empty())
        .count()
}

/// Why a model reply cannot be used as a description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unusable {
    Empty,
    Syntax,
    TooLong(usize),
}

impl Unusable {
    fn check(text: &str) -> Option<Self> {
        if text.is_empty() {
            Some(Unusable::Empty)
        } else if looks_like_automation_syntax(text) {
            Some(Unusable::Syntax)
        } else {
            let sentences = sentence_count(text);
            (sentences > MAX_SENTENCES).then_some(Unusable::TooLong(sentences))
        }
    }

    fn feedback(&self) -> &'static str {
        match self {
            Unusable::Empty | Unusable::Syntax => SYNTAX_FEEDBACK,
            Unusable::TooLong(_) => LENGTH_FEEDBACK,
        }
    }

    fn reason(&self) -> String {
        match self {
            Unusable::Empty => "model returned an empty description".to_string(),
            Unusable::Syntax => {
                "model kept returning automation syntax instead of a description".to_string()
            }
            Unusable::TooLong(n) => format!(
                "model kept returning {} sentences, at most {} allowed",
                n, MAX_SENTENCES
            ),
        }
    }
}

/// Produces the first description of a detected pattern.
#[derive(Debug, Clone)]
pub struct DescriptionGenerator {
    client: ModelClient,
    profile: GenerationProfile,
}

impl DescriptionGenerator {
    pub fn new(client: ModelClient, config: &PipelineConfig) -> Self {
        Self {
            client,
            profile: config.description,
        }
    }

    /// Describe `pattern` in one or two sentences.
    ///
    /// Output that is empty, looks like automation syntax, or runs past two
    /// sentences is rejected and the call is repeated once with corrective
    /// feedback.
    pub async fn generate(&self, pattern: &DetectedPattern) -> HearthResult<String> {
        let request =
            GenerationRequest::new(self.profile, SYSTEM_INSTRUCTION, build_prompt(pattern));

        let first = self
            .client
            .generate(&request)
            .await
            .map_err(generation_failed)?;
        let Some(problem) = Unusable::check(first.text.trim()) else {
            return Ok(first.text.trim().to_string());
        };

        tracing::warn!(
            pattern_id = %pattern.pattern_id,
            reason = %problem.reason(),
            "Description output rejected, retrying with feedback"
        );
        let retry = request.with_followup(first.text.clone(), problem.feedback());
        let second = self
            .client
            .generate(&retry)
            .await
            .map_err(generation_failed)?;
        let text = second.text.trim();
        match Unusable::check(text) {
            None => Ok(text.to_string()),
            Some(problem) => Err(PipelineError::GenerationFailed {
                attempts: 2,
                reason: problem.reason(),
            }
            .into()),
        }
    }
}

/// User prompt built from friendly names only.
fn build_prompt(pattern: &DetectedPattern) -> String {
    let trigger = &pattern.trigger_device;
    let mut prompt = format!(
        "Observed {} times ({:.0}% confidence).\nTrigger device: {}",
        pattern.occurrences,
        pattern.confidence * 100.0,
        trigger.friendly_name
    );
    if let Some(area) = &trigger.area {
        prompt.push_str(&format!(" in the {}", area));
    }
    prompt.push_str(&format!("\nWhen: {}", pattern.trigger_condition));

    let targets: Vec<&str> = pattern
        .action_devices
        .iter()
        .map(|d| d.friendly_name.as_str())
        .collect();
    prompt.push_str(&format!("\nDevices acted on: {}", targets.join(", ")));
    prompt.push_str(&format!("\nWhat happens: {}", pattern.observed_action));
    prompt.push_str("\n\nDescribe this automation.");
    prompt
}
