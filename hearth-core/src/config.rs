//! Configuration types

use crate::{ConfigError, HearthError, HearthResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sampling settings for one pipeline phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationProfile {
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Retry configuration for language model calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

/// Pipeline configuration passed to each component at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Model identifier sent to the provider
    pub model: String,
    /// Phase 2: natural but consistent phrasing
    pub description: GenerationProfile,
    /// Phase 3: structured output, consistency over creativity
    pub refinement: GenerationProfile,
    /// Phase 4: automation compilation
    pub compilation: GenerationProfile,
    pub retry: RetryConfig,
    /// Bound applied to every outbound call
    pub request_timeout: Duration,
    /// Scores below this block deployment
    pub safety_threshold: u8,
    /// Size of the shared model-call semaphore
    pub max_concurrent_model_calls: usize,
    /// Extra attempts after a malformed structured response
    pub structured_output_retries: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            description: GenerationProfile {
                temperature: 0.7,
                max_tokens: 200,
            },
            refinement: GenerationProfile {
                temperature: 0.5,
                max_tokens: 400,
            },
            compilation: GenerationProfile {
                temperature: 0.2,
                max_tokens: 1200,
            },
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(30),
            safety_threshold: 60,
            max_concurrent_model_calls: 4,
            structured_output_retries: 1,
        }
    }
}

impl PipelineConfig {
    /// Create PipelineConfig from environment variables.
    ///
    /// Environment variables:
    /// - `HEARTH_MODEL`: Model identifier (default: gpt-4o-mini)
    /// - `HEARTH_DESCRIPTION_TEMPERATURE` / `HEARTH_DESCRIPTION_MAX_TOKENS`
    /// - `HEARTH_REFINEMENT_TEMPERATURE` / `HEARTH_REFINEMENT_MAX_TOKENS`
    /// - `HEARTH_COMPILATION_TEMPERATURE` / `HEARTH_COMPILATION_MAX_TOKENS`
    /// - `HEARTH_RETRY_MAX_ATTEMPTS`: Attempts per model call (default: 3)
    /// - `HEARTH_RETRY_INITIAL_BACKOFF_MS` / `HEARTH_RETRY_MAX_BACKOFF_MS`
    /// - `HEARTH_REQUEST_TIMEOUT_SECS`: Per-call timeout (default: 30)
    /// - `HEARTH_SAFETY_THRESHOLD`: Minimum passing score (default: 60)
    /// - `HEARTH_MAX_CONCURRENT_MODEL_CALLS`: Semaphore size (default: 4)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            model: std::env::var("HEARTH_MODEL").unwrap_or(defaults.model),
            description: GenerationProfile {
                temperature: env_parse(
                    "HEARTH_DESCRIPTION_TEMPERATURE",
                    defaults.description.temperature,
                ),
                max_tokens: env_parse(
                    "HEARTH_DESCRIPTION_MAX_TOKENS",
                    defaults.description.max_tokens,
                ),
            },
            refinement: GenerationProfile {
                temperature: env_parse(
                    "HEARTH_REFINEMENT_TEMPERATURE",
                    defaults.refinement.temperature,
                ),
                max_tokens: env_parse(
                    "HEARTH_REFINEMENT_MAX_TOKENS",
                    defaults.refinement.max_tokens,
                ),
            },
            compilation: GenerationProfile {
                temperature: env_parse(
                    "HEARTH_COMPILATION_TEMPERATURE",
                    defaults.compilation.temperature,
                ),
                max_tokens: env_parse(
                    "HEARTH_COMPILATION_MAX_TOKENS",
                    defaults.compilation.max_tokens,
                ),
            },
            retry: RetryConfig {
                max_attempts: env_parse("HEARTH_RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts),
                initial_backoff: Duration::from_millis(env_parse(
                    "HEARTH_RETRY_INITIAL_BACKOFF_MS",
                    defaults.retry.initial_backoff.as_millis() as u64,
                )),
                max_backoff: Duration::from_millis(env_parse(
                    "HEARTH_RETRY_MAX_BACKOFF_MS",
                    defaults.retry.max_backoff.as_millis() as u64,
                )),
                backoff_multiplier: defaults.retry.backoff_multiplier,
            },
            request_timeout: Duration::from_secs(env_parse(
                "HEARTH_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )),
            safety_threshold: env_parse("HEARTH_SAFETY_THRESHOLD", defaults.safety_threshold),
            max_concurrent_model_calls: env_parse(
                "HEARTH_MAX_CONCURRENT_MODEL_CALLS",
                defaults.max_concurrent_model_calls,
            ),
            structured_output_retries: defaults.structured_output_retries,
        }
    }

    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(HearthError::Config) if invalid.
    pub fn validate(&self) -> HearthResult<()> {
        if self.model.trim().is_empty() {
            return Err(HearthError::Config(ConfigError::MissingRequired {
                field: "model".to_string(),
            }));
        }

        for (name, profile) in [
            ("description", &self.description),
            ("refinement", &self.refinement),
            ("compilation", &self.compilation),
        ] {
            if !(0.0..=2.0).contains(&profile.temperature) {
                return Err(invalid(
                    &format!("{}.temperature", name),
                    profile.temperature,
                    "temperature must be between 0.0 and 2.0",
                ));
            }
            if profile.max_tokens == 0 {
                return Err(invalid(
                    &format!("{}.max_tokens", name),
                    profile.max_tokens,
                    "max_tokens must be greater than 0",
                ));
            }
        }

        if self.refinement.temperature > self.description.temperature {
            return Err(invalid(
                "refinement.temperature",
                self.refinement.temperature,
                "refinement must not run hotter than description generation",
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(invalid(
                "retry.max_attempts",
                self.retry.max_attempts,
                "at least one attempt is required",
            ));
        }

        if self.retry.backoff_multiplier < 1.0 {
            return Err(invalid(
                "retry.backoff_multiplier",
                self.retry.backoff_multiplier,
                "backoff_multiplier must be at least 1.0",
            ));
        }

        if self.retry.max_backoff < self.retry.initial_backoff {
            return Err(invalid(
                "retry.max_backoff",
                format!("{:?}", self.retry.max_backoff),
                "max_backoff must not be shorter than initial_backoff",
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(invalid(
                "request_timeout",
                format!("{:?}", self.request_timeout),
                "request_timeout must be positive",
            ));
        }

        if self.safety_threshold > 100 {
            return Err(invalid(
                "safety_threshold",
                self.safety_threshold,
                "safety_threshold must be between 0 and 100",
            ));
        }

        if self.max_concurrent_model_calls == 0 {
            return Err(invalid(
                "max_concurrent_model_calls",
                self.max_concurrent_model_calls,
                "max_concurrent_model_calls must be greater than 0",
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> HearthError {
    HearthError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
