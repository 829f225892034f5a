//! Interfaces to the renderer's external collaborators.
//!
//! The renderer does not own the device inventory, the configuration store
//! or the policy resolver. It reaches them only through these traits.

use async_trait::async_trait;
use gbp_events::Topology;
use gbp_id::{DeviceId, GroupKey, StageId};

use crate::error::{StoreError, TopologyError};

/// Source of the device inventory.
#[async_trait]
pub trait TopologySource: Send + Sync {
    /// Read the full, current inventory.
    async fn read_topology(&self) -> Result<Topology, TopologyError>;
}

/// Device configuration store.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Write the initial stage table for a newly seen device.
    ///
    /// Returns once the store has acknowledged the write.
    async fn write_stage_table(&self, device: &DeviceId, table: &[StageId])
        -> Result<(), StoreError>;
}

/// The policy resolver's interest set.
pub trait PolicyScope: Send + Sync {
    /// Ask the resolver to resolve policy for `group`.
    fn add_to_scope(&self, group: &GroupKey);
}
