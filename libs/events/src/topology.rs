//! Topology inventory as reported by the topology source.

use gbp_id::DeviceId;
use serde::{Deserialize, Serialize};

use crate::EventError;

/// Capability descriptor a device advertises once it can be programmed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software: Option<String>,
}

/// One device entry from the topology inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescription {
    pub id: DeviceId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<Capability>,
}

impl DeviceDescription {
    /// A device with no capability descriptor (connected, not programmable).
    pub fn inactive(id: impl Into<DeviceId>) -> Self {
        Self {
            id: id.into(),
            capability: None,
        }
    }

    /// A device advertising a described capability.
    pub fn active(id: impl Into<DeviceId>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capability: Some(Capability {
                description: Some(description.into()),
                ..Capability::default()
            }),
        }
    }

    /// Returns true if the device is ready to be taken into the pipeline.
    ///
    /// Devices that are present but have not yet reported a described
    /// capability are ignored.
    pub fn is_active(&self) -> bool {
        self.capability
            .as_ref()
            .is_some_and(|c| c.description.is_some())
    }
}

/// The full device inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    #[serde(default)]
    pub devices: Vec<DeviceDescription>,
}

impl Topology {
    /// Parses an inventory document.
    pub fn from_json_str(s: &str) -> Result<Self, EventError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Iterates over the devices that are active.
    pub fn active_devices(&self) -> impl Iterator<Item = &DeviceDescription> {
        self.devices.iter().filter(|d| d.is_active())
    }
}
