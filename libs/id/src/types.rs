//! Typed key definitions for renderer resources.
//!
//! Each key type wraps an opaque string handed to us by an external system.
//! Tenant ids may not contain `/` because it separates the two halves of a
//! [`GroupKey`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::define_key;
use crate::IdError;

// =============================================================================
// Topology
// =============================================================================

define_key!(DeviceId, "device id", []);

// =============================================================================
// Endpoints
// =============================================================================

define_key!(EndpointKey, "endpoint key", []);

// =============================================================================
// Policy Model
// =============================================================================

define_key!(TenantId, "tenant id", ['/']);
define_key!(GroupId, "group id", []);
define_key!(UniqueId, "unique id", []);

/// A tenant-scoped policy group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub tenant: TenantId,
    pub group: GroupId,
}

impl GroupKey {
    /// Kind name used in error messages.
    pub const KIND: &'static str = "group key";

    /// Creates a group key from its parts.
    #[must_use]
    pub fn new(tenant: impl Into<TenantId>, group: impl Into<GroupId>) -> Self {
        Self {
            tenant: tenant.into(),
            group: group.into(),
        }
    }

    /// Parses `tenant/group`.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty { kind: Self::KIND });
        }

        let Some((tenant, group)) = s.split_once('/') else {
            return Err(IdError::MissingSeparator { kind: Self::KIND });
        };

        Ok(Self {
            tenant: TenantId::parse(tenant)?,
            group: GroupId::parse(group)?,
        })
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant, self.group)
    }
}

impl FromStr for GroupKey {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Numeric id of a pipeline stage's device table.
///
/// Stage ids are written to a device's initial configuration in pipeline
/// order, so they double as the table layout the device is prepared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(u8);

impl StageId {
    /// Creates a stage id.
    #[must_use]
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    /// Returns the underlying table number.
    #[must_use]
    pub const fn value(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for StageId {
    fn from(id: u8) -> Self {
        Self(id)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_device_id_parse() {
        let id = DeviceId::parse("openflow:1").unwrap();
        assert_eq!(id.as_str(), "openflow:1");
        assert_eq!(id.to_string(), "openflow:1");
    }

    #[test]
    fn test_device_id_empty() {
        let result: Result<DeviceId, _> = "".parse();
        assert!(matches!(result.unwrap_err(), IdError::Empty { .. }));
    }

    #[test]
    fn test_endpoint_key_rejects_whitespace() {
        let result = EndpointKey::parse("bd1 00:00:00:00:00:01");
        assert_eq!(
            result.unwrap_err(),
            IdError::InvalidCharacter {
                kind: EndpointKey::KIND,
                ch: ' '
            }
        );
    }

    #[test]
    fn test_tenant_id_rejects_slash() {
        let result = TenantId::parse("a/b");
        assert!(matches!(
            result.unwrap_err(),
            IdError::InvalidCharacter { ch: '/', .. }
        ));
    }

    #[test]
    fn test_unchecked_constructor_allows_empty() {
        let tenant = TenantId::new("");
        assert!(tenant.is_empty());
    }

    #[test]
    fn test_group_key_parse() {
        let key: GroupKey = "tenant-a/web/frontend".parse().unwrap();
        assert_eq!(key.tenant.as_str(), "tenant-a");
        assert_eq!(key.group.as_str(), "web/frontend");
        assert_eq!(key.to_string(), "tenant-a/web/frontend");
    }

    #[test]
    fn test_group_key_missing_separator() {
        let result = GroupKey::parse("tenant-a");
        assert!(matches!(
            result.unwrap_err(),
            IdError::MissingSeparator { .. }
        ));
    }

    #[test]
    fn test_device_id_json_rejects_invalid() {
        let result: Result<DeviceId, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());

        let id: DeviceId = serde_json::from_str("\"openflow:7\"").unwrap();
        assert_eq!(id, DeviceId::new("openflow:7"));
    }

    #[test]
    fn test_keys_borrow_as_str() {
        let mut set = std::collections::HashSet::new();
        set.insert(UniqueId::new("ctx-1"));
        assert!(set.contains("ctx-1"));
    }

    #[test]
    fn test_stage_id_serializes_as_number() {
        let json = serde_json::to_string(&StageId::new(3)).unwrap();
        assert_eq!(json, "3");
    }

    proptest! {
        #[test]
        fn prop_valid_device_ids_display_unchanged(s in "[a-z0-9:._-]{1,32}") {
            let id = DeviceId::parse(&s).unwrap();
            prop_assert_eq!(id.to_string(), s);
        }

        #[test]
        fn prop_group_key_display_parses_back(
            tenant in "[a-z0-9-]{1,16}",
            group in "[a-z0-9/-]{1,16}",
        ) {
            let key = GroupKey::new(tenant.as_str(), group.as_str());
            let parsed = GroupKey::parse(&key.to_string()).unwrap();
            prop_assert_eq!(parsed, key);
        }
    }
}
