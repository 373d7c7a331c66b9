//! Device capability records supplied by the capability gateway.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Feature names the refiner validates edits against.
pub const FEATURE_BRIGHTNESS: &str = "brightness";
pub const FEATURE_COLOR: &str = "color";
pub const FEATURE_COLOR_TEMP: &str = "color_temp";
pub const FEATURE_TRANSITION: &str = "transition";
pub const FEATURE_EFFECT: &str = "effect";
pub const FEATURE_FLASH: &str = "flash";

/// Capabilities of a single device/entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapability {
    pub entity_id: String,
    pub friendly_name: String,
    /// Entity domain (`light`, `switch`, `lock`, ...)
    pub domain: String,
    #[serde(default)]
    pub area: Option<String>,
    #[serde(default)]
    pub supported_features: BTreeMap<String, bool>,
    /// Human-readable capability strings ("Adjustable brightness", ...)
    #[serde(default)]
    pub friendly_capabilities: Vec<String>,
}

impl DeviceCapability {
    pub fn new(
        entity_id: impl Into<String>,
        friendly_name: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            friendly_name: friendly_name.into(),
            domain: domain.into(),
            area: None,
            supported_features: BTreeMap::new(),
            friendly_capabilities: Vec::new(),
        }
    }

    pub fn with_area(mut self, area: impl Into<String>) -> Self {
        self.area = Some(area.into());
        self
    }

    pub fn with_feature(mut self, feature: impl Into<String>, supported: bool) -> Self {
        self.supported_features.insert(feature.into(), supported);
        self
    }

    pub fn with_friendly_capability(mut self, text: impl Into<String>) -> Self {
        self.friendly_capabilities.push(text.into());
        self
    }

    pub fn supports(&self, feature: &str) -> bool {
        self.supported_features.get(feature).copied().unwrap_or(false)
    }
}

/// The capability set a refinement was validated against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    pub devices: Vec<DeviceCapability>,
}

impl CapabilitySet {
    pub fn new(devices: Vec<DeviceCapability>) -> Self {
        Self { devices }
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn device(&self, entity_id: &str) -> Option<&DeviceCapability> {
        self.devices.iter().find(|d| d.entity_id == entity_id)
    }

    /// True when at least one device in the set supports `feature`.
    pub fn supports(&self, feature: &str) -> bool {
        self.devices.iter().any(|d| d.supports(feature))
    }

    /// Features from `requested` that no device supports, sorted and deduplicated.
    pub fn unsupported<'a, I>(&self, requested: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        requested
            .into_iter()
            .filter(|feature| !self.supports(feature))
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn entity_ids(&self) -> impl Iterator<Item = &str> {
        self.devices.iter().map(|d| d.entity_id.as_str())
    }

    /// Render the set as prompt context, one device per line.
    pub fn describe(&self) -> String {
        self.devices
            .iter()
            .map(|d| {
                let supported: Vec<&str> = d
                    .supported_features
                    .iter()
                    .filter(|(_, on)| **on)
                    .map(|(name, _)| name.as_str())
                    .collect();
                let area = d.area.as_deref().unwrap_or("unknown area");
                let mut line = format!(
                    "- {} ({}, {}): supports [{}]",
                    d.friendly_name,
                    d.entity_id,
                    area,
                    supported.join(", ")
                );
                if !d.friendly_capabilities.is_empty() {
                    line.push_str(&format!("; {}", d.friendly_capabilities.join("; ")));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
