//! Device capability lookup.

use async_trait::async_trait;
use hearth_core::{CapabilitySet, DeviceCapability, HearthError, HearthResult, PipelineError};
use reqwest::Client;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Source of per-device capability records.
#[async_trait]
pub trait CapabilityGateway: Send + Sync {
    /// Capabilities of a single entity.
    async fn capabilities(&self, entity_id: &str) -> HearthResult<DeviceCapability>;

    /// Capabilities of every entity, fetched one after another.
    async fn capability_set(&self, entity_ids: &[String]) -> HearthResult<CapabilitySet> {
        let mut devices = Vec::with_capacity(entity_ids.len());
        for entity_id in entity_ids {
            devices.push(self.capabilities(entity_id).await?);
        }
        Ok(CapabilitySet::new(devices))
    }
}

fn lookup_failed(entity_id: &str, reason: impl Into<String>) -> HearthError {
    HearthError::Pipeline(PipelineError::CapabilityLookupFailed {
        entity_id: entity_id.to_string(),
        reason: reason.into(),
    })
}

// ============================================================================
// HTTP GATEWAY
// ============================================================================

/// Wire shape of the capability service response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CapabilityPayload {
    #[serde(alias = "entity_id")]
    entity_id: String,
    #[serde(alias = "friendly_name")]
    friendly_name: String,
    domain: String,
    #[serde(default)]
    area: Option<String>,
    #[serde(default, alias = "supported_features")]
    supported_features: BTreeMap<String, bool>,
    #[serde(default, alias = "friendly_capabilities")]
    friendly_capabilities: Vec<String>,
}

impl From<CapabilityPayload> for DeviceCapability {
    fn from(p: CapabilityPayload) -> Self {
        DeviceCapability {
            entity_id: p.entity_id,
            friendly_name: p.friendly_name,
            domain: p.domain,
            area: p.area,
            supported_features: p.supported_features,
            friendly_capabilities: p.friendly_capabilities,
        }
    }
}

/// Capability service reached over HTTP.
///
/// `GET {base_url}/api/devices/{entity_id}/capabilities`
pub struct HttpCapabilityGateway {
    client: Client,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpCapabilityGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            timeout,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url_for(&self, entity_id: &str) -> String {
        format!("{}/api/devices/{}/capabilities", self.base_url, entity_id)
    }
}

#[async_trait]
impl CapabilityGateway for HttpCapabilityGateway {
    async fn capabilities(&self, entity_id: &str) -> HearthResult<DeviceCapability> {
        let mut request = self.client.get(self.url_for(entity_id)).timeout(self.timeout);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| lookup_failed(entity_id, format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(lookup_failed(
                entity_id,
                format!("capability service returned {}", status.as_u16()),
            ));
        }

        let payload: CapabilityPayload = response
            .json()
            .await
            .map_err(|e| lookup_failed(entity_id, format!("Failed to parse response: {}", e)))?;
        Ok(payload.into())
    }
}

impl std::fmt::Debug for HttpCapabilityGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCapabilityGateway")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

// ============================================================================
// STATIC GATEWAY
// ============================================================================

/// In-memory capability records, replaceable at runtime.
#[derive(Debug, Clone, Default)]
pub struct StaticCapabilityGateway {
    devices: Arc<RwLock<HashMap<String, DeviceCapability>>>,
}

impl StaticCapabilityGateway {
    pub fn new(devices: impl IntoIterator<Item = DeviceCapability>) -> Self {
        let map = devices
            .into_iter()
            .map(|d| (d.entity_id.clone(), d))
            .collect();
        Self {
            devices: Arc::new(RwLock::new(map)),
        }
    }

    pub fn from_set(set: CapabilitySet) -> Self {
        Self::new(set.devices)
    }

    /// Add or replace a device.
    pub fn upsert(&self, device: DeviceCapability) {
        if let Ok(mut devices) = self.devices.write() {
            devices.insert(device.entity_id.clone(), device);
        }
    }
}

#[async_trait]
impl CapabilityGateway for StaticCapabilityGateway {
    async fn capabilities(&self, entity_id: &str) -> HearthResult<DeviceCapability> {
        let devices = self
            .devices
            .read()
            .map_err(|_| lookup_failed(entity_id, "capability table lock poisoned"))?;
        devices
            .get(entity_id)
            .cloned()
            .ok_or_else(|| lookup_failed(entity_id, "unknown entity"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_test_utils::fixtures::{bedroom_capabilities, bedroom_light, BEDROOM_LIGHT};

    #[tokio::test]
    async fn test_static_gateway_lookup() {
        let gateway = StaticCapabilityGateway::new(vec![bedroom_light()]);
        let device = gateway.capabilities(BEDROOM_LIGHT).await.unwrap();
        assert!(!device.supports("color"));

        let err = gateway.capabilities("light.unknown").await.unwrap_err();
        assert!(matches!(
            err,
            HearthError::Pipeline(PipelineError::CapabilityLookupFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_capability_set_preserves_order() {
        let gateway = StaticCapabilityGateway::from_set(bedroom_capabilities());
        let ids = vec![
            BEDROOM_LIGHT.to_string(),
            "binary_sensor.bedroom_door".to_string(),
        ];
        let set = gateway.capability_set(&ids).await.unwrap();
        let fetched: Vec<&str> = set.entity_ids().collect();
        assert_eq!(fetched, vec![BEDROOM_LIGHT, "binary_sensor.bedroom_door"]);
    }

    #[test]
    fn test_payload_accepts_camel_and_snake_case() {
        let camel: CapabilityPayload = serde_json::from_str(
            r#"{"entityId": "light.x", "friendlyName": "X", "domain": "light",
                "supportedFeatures": {"brightness": true}, "friendlyCapabilities": ["Dimmable"]}"#,
        )
        .unwrap();
        let snake: CapabilityPayload = serde_json::from_str(
            r#"{"entity_id": "light.x", "friendly_name": "X", "domain": "light",
                "supported_features": {"brightness": true}}"#,
        )
        .unwrap();
        let camel: DeviceCapability = camel.into();
        let snake: DeviceCapability = snake.into();
        assert!(camel.supports("brightness"));
        assert!(snake.supports("brightness"));
        assert_eq!(camel.friendly_capabilities, vec!["Dimmable".to_string()]);
    }

    #[test]
    fn test_url_and_debug() {
        let gateway = HttpCapabilityGateway::new("http://ha.local:8123/", Duration::from_secs(5))
            .with_token("secret");
        assert_eq!(
            gateway.url_for("light.bedroom"),
            "http://ha.local:8123/api/devices/light.bedroom/capabilities"
        );
        assert!(!format!("{:?}", gateway).contains("secret"));
    }
}
