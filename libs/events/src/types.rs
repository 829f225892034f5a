//! Change-event definitions.
//!
//! Each variant mirrors one notification the renderer accepts from the
//! endpoint directory or the policy resolver.

use std::collections::BTreeSet;

use gbp_id::{DeviceId, EndpointKey, GroupKey};
use serde::{Deserialize, Serialize};

use crate::EventError;

// =============================================================================
// Event Type Constants
// =============================================================================

/// All event type names as constants.
pub mod event_types {
    // Endpoint directory
    pub const ENDPOINT_UPDATED: &str = "endpoint.updated";
    pub const DEVICE_ENDPOINT_UPDATED: &str = "device_endpoint.updated";
    pub const GROUP_ENDPOINT_UPDATED: &str = "group_endpoint.updated";

    // Policy resolution
    pub const POLICY_UPDATED: &str = "policy.updated";

    /// Every event type the renderer understands.
    pub const ALL: &[&str] = &[
        ENDPOINT_UPDATED,
        DEVICE_ENDPOINT_UPDATED,
        GROUP_ENDPOINT_UPDATED,
        POLICY_UPDATED,
    ];
}

// =============================================================================
// Change Events
// =============================================================================

/// A change notification from an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum ChangeEvent {
    /// An endpoint's attributes changed.
    #[serde(rename = "endpoint.updated")]
    EndpointUpdated { endpoint: EndpointKey },

    /// An endpoint attached to, moved on, or left a device.
    #[serde(rename = "device_endpoint.updated")]
    DeviceEndpointUpdated {
        device: DeviceId,
        endpoint: EndpointKey,
    },

    /// An endpoint joined or left a policy group.
    #[serde(rename = "group_endpoint.updated")]
    GroupEndpointUpdated {
        group: GroupKey,
        endpoint: EndpointKey,
    },

    /// Resolved policy changed for the listed consumer groups.
    #[serde(rename = "policy.updated")]
    PolicyUpdated { groups: BTreeSet<GroupKey> },
}

impl ChangeEvent {
    /// Returns the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            ChangeEvent::EndpointUpdated { .. } => event_types::ENDPOINT_UPDATED,
            ChangeEvent::DeviceEndpointUpdated { .. } => event_types::DEVICE_ENDPOINT_UPDATED,
            ChangeEvent::GroupEndpointUpdated { .. } => event_types::GROUP_ENDPOINT_UPDATED,
            ChangeEvent::PolicyUpdated { .. } => event_types::POLICY_UPDATED,
        }
    }

    /// Decodes an event from its JSON form.
    ///
    /// Unknown event types are reported separately from malformed payloads
    /// so adapters can skip events from newer producers.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, EventError> {
        let event_type = value
            .get("event_type")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| EventError::InvalidPayload("missing event_type".to_string()))?;

        if !event_types::ALL.contains(&event_type) {
            return Err(EventError::UnknownEventType(event_type.to_string()));
        }

        serde_json::from_value(value.clone()).map_err(|e| EventError::InvalidPayload(e.to_string()))
    }

    /// Encodes the event as JSON.
    pub fn to_json(&self) -> Result<serde_json::Value, EventError> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_tag() {
        let event = ChangeEvent::EndpointUpdated {
            endpoint: EndpointKey::new("bd1/00:00:00:00:00:01"),
        };
        let json = event.to_json().unwrap();
        assert_eq!(json["event_type"], "endpoint.updated");
        assert_eq!(json["endpoint"], "bd1/00:00:00:00:00:01");
        assert_eq!(event.event_type(), event_types::ENDPOINT_UPDATED);
    }

    #[test]
    fn test_policy_updated_from_json() {
        let json = serde_json::json!({
            "event_type": "policy.updated",
            "groups": [
                {"tenant": "t1", "group": "web"},
                {"tenant": "t1", "group": "db"}
            ]
        });

        let event = ChangeEvent::from_json(&json).unwrap();
        let ChangeEvent::PolicyUpdated { groups } = event else {
            panic!("expected policy.updated");
        };
        assert_eq!(groups.len(), 2);
        assert!(groups.contains(&GroupKey::new("t1", "web")));
    }

    #[test]
    fn test_unknown_event_type() {
        let json = serde_json::json!({"event_type": "tenant.deleted"});
        let err = ChangeEvent::from_json(&json).unwrap_err();
        assert!(matches!(err, EventError::UnknownEventType(t) if t == "tenant.deleted"));
    }

    #[test]
    fn test_invalid_payload() {
        let json = serde_json::json!({
            "event_type": "device_endpoint.updated",
            "device": "openflow:1"
        });
        let err = ChangeEvent::from_json(&json).unwrap_err();
        assert!(matches!(err, EventError::InvalidPayload(_)));
    }

    #[test]
    fn test_missing_event_type() {
        let err = ChangeEvent::from_json(&serde_json::json!({})).unwrap_err();
        assert!(matches!(err, EventError::InvalidPayload(_)));
    }
}
