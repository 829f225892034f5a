//! Built-in stages.

use std::sync::Arc;

use async_trait::async_trait;
use gbp_id::{DeviceId, StageId, UniqueId};
use tracing::{debug, info};

use crate::dirty::DirtyState;
use crate::error::StageError;
use crate::ordinal::OrdinalAllocator;
use crate::pipeline::Stage;

/// Logs what a real stage would reprogram on each device.
///
/// The binary runs with these until device-specific stages are plugged in.
#[derive(Debug, Clone)]
pub struct LoggingStage {
    name: String,
    table_id: StageId,
    ordinals: Option<Arc<OrdinalAllocator>>,
}

impl LoggingStage {
    pub fn new(name: impl Into<String>, table_id: StageId) -> Self {
        Self {
            name: name.into(),
            table_id,
            ordinals: None,
        }
    }

    /// Also log the context ordinal of every group with changed policy.
    pub fn with_ordinals(mut self, ordinals: Arc<OrdinalAllocator>) -> Self {
        self.ordinals = Some(ordinals);
        self
    }
}

#[async_trait]
impl Stage for LoggingStage {
    fn table_id(&self) -> StageId {
        self.table_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn update(&self, device: &DeviceId, dirty: &DirtyState) -> Result<(), StageError> {
        let summary = dirty.summary();
        info!(
            device_id = %device,
            stage = %self.name,
            table_id = %self.table_id,
            endpoints = summary.endpoints,
            groups = summary.groups,
            device_dirty = dirty.contains_device(device),
            attachments = dirty.device_endpoints(device).len(),
            "Stage update"
        );

        if let Some(ordinals) = &self.ordinals {
            for group in dirty.groups() {
                let id = UniqueId::new(group.group.as_str());
                let ordinal = ordinals.ordinal(&group.tenant, &id);
                debug!(device_id = %device, group = %group, ordinal, "Group context");
            }
        }
        Ok(())
    }
}
