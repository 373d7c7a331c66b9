//! Pushing definitions to the automation platform.

use async_trait::async_trait;
use hearth_core::{HearthError, HearthResult, PipelineError};
use reqwest::Client;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Destination that installs automation definitions.
#[async_trait]
pub trait DeploymentTarget: Send + Sync {
    /// Install or replace `automation_id` with `definition_text`.
    async fn push(&self, automation_id: &str, definition_text: &str) -> HearthResult<()>;
}

fn deployment_failed(automation_id: &str, reason: impl Into<String>) -> HearthError {
    HearthError::Pipeline(PipelineError::DeploymentFailed {
        automation_id: automation_id.to_string(),
        reason: reason.into(),
    })
}

// ============================================================================
// HOME ASSISTANT
// ============================================================================

/// Home Assistant automation config API.
///
/// `POST {base_url}/api/config/automation/config/{automation_id}` with the
/// definition as YAML.
pub struct HomeAssistantTarget {
    client: Client,
    base_url: String,
    token: String,
    timeout: Duration,
}

impl HomeAssistantTarget {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            timeout,
        }
    }

    fn url_for(&self, automation_id: &str) -> String {
        format!(
            "{}/api/config/automation/config/{}",
            self.base_url, automation_id
        )
    }
}

#[async_trait]
impl DeploymentTarget for HomeAssistantTarget {
    async fn push(&self, automation_id: &str, definition_text: &str) -> HearthResult<()> {
        let response = self
            .client
            .post(self.url_for(automation_id))
            .bearer_auth(&self.token)
            .header("Content-Type", "application/yaml")
            .timeout(self.timeout)
            .body(definition_text.to_string())
            .send()
            .await
            .map_err(|e| deployment_failed(automation_id, format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(deployment_failed(
                automation_id,
                format!("platform returned {}: {}", status.as_u16(), body),
            ));
        }
        tracing::debug!(automation_id, "Definition pushed");
        Ok(())
    }
}

impl std::fmt::Debug for HomeAssistantTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HomeAssistantTarget")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

// ============================================================================
// RECORDING TARGET
// ============================================================================

/// Keeps pushed definitions in memory. Failures can be scripted.
#[derive(Debug, Clone, Default)]
pub struct RecordingTarget {
    pushes: Arc<Mutex<Vec<(String, String)>>>,
    failures_left: Arc<Mutex<u32>>,
}

impl RecordingTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` pushes fail.
    pub fn fail_next(&self, count: u32) {
        if let Ok(mut left) = self.failures_left.lock() {
            *left = count;
        }
    }

    /// Every successful push as `(automation_id, definition_text)`, oldest first.
    pub fn pushes(&self) -> Vec<(String, String)> {
        self.pushes.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Most recent successful push for `automation_id`.
    pub fn installed(&self, automation_id: &str) -> Option<String> {
        self.pushes()
            .into_iter()
            .rev()
            .find(|(id, _)| id == automation_id)
            .map(|(_, text)| text)
    }
}

#[async_trait]
impl DeploymentTarget for RecordingTarget {
    async fn push(&self, automation_id: &str, definition_text: &str) -> HearthResult<()> {
        {
            let mut left = self
                .failures_left
                .lock()
                .map_err(|_| deployment_failed(automation_id, "recorder lock poisoned"))?;
            if *left > 0 {
                *left -= 1;
                return Err(deployment_failed(automation_id, "scripted failure"));
            }
        }
        self.pushes
            .lock()
            .map_err(|_| deployment_failed(automation_id, "recorder lock poisoned"))?
            .push((automation_id.to_string(), definition_text.to_string()));
        Ok(())
    }
}
