//! In-process implementations of the collaborator traits.
//!
//! Used by the `renderer` binary when no external inventory or store is
//! wired in, and by tests.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use gbp_events::{DeviceDescription, Topology};
use gbp_id::{DeviceId, GroupKey, StageId};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{StoreError, TopologyError};
use crate::sources::{ConfigStore, PolicyScope, TopologySource};

/// Topology held in memory and edited directly.
#[derive(Debug, Default)]
pub struct MemoryTopology {
    topology: Mutex<Topology>,
    failing: AtomicBool,
    reads: AtomicU64,
}

impl MemoryTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device, or replace the entry with the same id.
    pub fn upsert(&self, device: DeviceDescription) {
        let mut topology = self.topology.lock();
        match topology.devices.iter_mut().find(|d| d.id == device.id) {
            Some(existing) => *existing = device,
            None => topology.devices.push(device),
        }
    }

    pub fn remove(&self, id: &DeviceId) {
        self.topology.lock().devices.retain(|d| &d.id != id);
    }

    pub fn replace(&self, topology: Topology) {
        *self.topology.lock() = topology;
    }

    /// Make every read fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of reads attempted.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TopologySource for MemoryTopology {
    async fn read_topology(&self) -> Result<Topology, TopologyError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(TopologyError::Unavailable(
                "topology source configured to fail".to_string(),
            ));
        }
        Ok(self.topology.lock().clone())
    }
}

/// Topology read from a JSON document on disk on every resync.
#[derive(Debug, Clone)]
pub struct FileTopology {
    path: PathBuf,
}

impl FileTopology {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TopologySource for FileTopology {
    async fn read_topology(&self) -> Result<Topology, TopologyError> {
        let contents = tokio::fs::read_to_string(&self.path).await?;
        let topology = Topology::from_json_str(&contents)?;
        debug!(
            path = %self.path.display(),
            devices = topology.devices.len(),
            "Read topology file"
        );
        Ok(topology)
    }
}

/// Configuration store that keeps stage tables in memory.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    tables: DashMap<DeviceId, Vec<StageId>>,
    failing: AtomicBool,
    write_delay: Mutex<Duration>,
    writes: AtomicU64,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that rejects every write.
    pub fn failing() -> Self {
        let store = Self::default();
        store.set_failing(true);
        store
    }

    /// A store that takes `delay` to acknowledge each write.
    pub fn with_write_delay(delay: Duration) -> Self {
        let store = Self::default();
        store.set_write_delay(delay);
        store
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock() = delay;
    }

    /// The stage table last written for `device`.
    pub fn stage_table(&self, device: &DeviceId) -> Option<Vec<StageId>> {
        self.tables.get(device).map(|t| t.value().clone())
    }

    /// Number of writes attempted.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn write_stage_table(
        &self,
        device: &DeviceId,
        table: &[StageId],
    ) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);

        let delay = *self.write_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected {
                device: device.clone(),
                reason: "store configured to fail".to_string(),
            });
        }

        info!(device_id = %device, tables = table.len(), "Stage table written");
        self.tables.insert(device.clone(), table.to_vec());
        Ok(())
    }
}

/// Policy scope that records the groups it was asked to cover.
#[derive(Debug, Default)]
pub struct MemoryScope {
    groups: DashSet<GroupKey>,
}

impl MemoryScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn groups(&self) -> BTreeSet<GroupKey> {
        self.groups.iter().map(|g| g.key().clone()).collect()
    }

    pub fn contains(&self, group: &GroupKey) -> bool {
        self.groups.contains(group)
    }
}

impl PolicyScope for MemoryScope {
    fn add_to_scope(&self, group: &GroupKey) {
        if self.groups.insert(group.clone()) {
            debug!(group = %group, "Group added to policy scope");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    #[tokio::test]
    async fn test_memory_topology_upsert_and_remove() {
        let topology = MemoryTopology::new();
        topology.upsert(DeviceDescription::inactive("openflow:1"));
        topology.upsert(DeviceDescription::active("openflow:1", "ovs"));
        topology.upsert(DeviceDescription::active("openflow:2", "ovs"));

        let read = topology.read_topology().await.unwrap();
        assert_eq!(read.devices.len(), 2);
        assert_eq!(read.active_devices().count(), 2);

        topology.remove(&DeviceId::new("openflow:1"));
        let read = topology.read_topology().await.unwrap();
        assert_eq!(read.devices.len(), 1);
        assert_eq!(topology.reads(), 2);
    }

    #[tokio::test]
    async fn test_file_topology_reads_document() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"devices": [
                {{"id": "openflow:1", "capability": {{"description": "ovs"}}}},
                {{"id": "openflow:2"}}
            ]}}"#
        )
        .unwrap();

        let source = FileTopology::new(file.path());
        let topology = source.read_topology().await.unwrap();
        let active: Vec<_> = topology.active_devices().map(|d| d.id.as_str()).collect();
        assert_eq!(active, vec!["openflow:1"]);
    }

    #[tokio::test]
    async fn test_file_topology_errors() {
        let missing = FileTopology::new("/nonexistent/topology.json");
        assert!(matches!(
            missing.read_topology().await,
            Err(TopologyError::Io(_))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let invalid = FileTopology::new(file.path());
        assert!(matches!(
            invalid.read_topology().await,
            Err(TopologyError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store_records_and_fails() {
        let store = MemoryConfigStore::new();
        let device = DeviceId::new("openflow:1");
        store
            .write_stage_table(&device, &[StageId::new(0)])
            .await
            .unwrap();
        assert_eq!(store.stage_table(&device), Some(vec![StageId::new(0)]));

        store.set_failing(true);
        assert!(store.write_stage_table(&device, &[]).await.is_err());
        assert_eq!(store.writes(), 2);
    }

    #[test]
    fn test_memory_scope_dedupes() {
        let scope = MemoryScope::new();
        scope.add_to_scope(&GroupKey::new("t1", "g1"));
        scope.add_to_scope(&GroupKey::new("t1", "g1"));
        assert_eq!(scope.groups().len(), 1);
        assert!(scope.contains(&GroupKey::new("t1", "g1")));
    }
}
