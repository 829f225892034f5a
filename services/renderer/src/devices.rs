//! Device registry.
//!
//! Tracks every programmable device seen in the topology inventory:
//!
//! ```text
//!   (first seen, active) ──► Preparing ──(stage table acked)──► Ready
//!                               │                                 │
//!                               └──────(gone from inventory)──────┴──► removed
//! ```
//!
//! Listeners hear about the Preparing → Ready edge once per incarnation of a
//! device and about the removal of devices they were told were ready.
//! Resyncs read the whole inventory and diff it against the registry; they
//! are serialised so two diffs never interleave. Store acknowledgments take
//! the same lock, so for any incarnation `ready` is always delivered before
//! `removed`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gbp_events::DeviceDescription;
use gbp_id::{DeviceId, StageId};
use gbp_reconcile::{Reconcile, ReconcileError, SingletonTask};
use parking_lot::RwLock;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::TopologyError;
use crate::sources::{ConfigStore, TopologySource};

/// Lifecycle state of a known device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Seen in the inventory, stage table not yet acknowledged.
    Preparing,
    /// Ready for policy to be programmed.
    Ready,
}

/// Registry entry for one device.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub status: DeviceStatus,
    /// Inventory entry as of the last resync.
    pub description: DeviceDescription,
    /// Distinguishes a device that reappears after removal from its
    /// previous incarnation.
    pub generation: u64,
}

/// Callback invoked with a copy of the affected record.
pub type DeviceCallback = Arc<dyn Fn(&DeviceRecord) + Send + Sync>;

/// A set of device lifecycle callbacks.
#[derive(Clone, Default)]
pub struct DeviceListener {
    ready: Option<DeviceCallback>,
    removed: Option<DeviceCallback>,
}

impl DeviceListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called when a device becomes ready.
    pub fn on_ready(mut self, f: impl Fn(&DeviceRecord) + Send + Sync + 'static) -> Self {
        self.ready = Some(Arc::new(f));
        self
    }

    /// Called when a ready device disappears from the inventory.
    pub fn on_removed(mut self, f: impl Fn(&DeviceRecord) + Send + Sync + 'static) -> Self {
        self.removed = Some(Arc::new(f));
        self
    }
}

/// Outcome of one inventory resync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResyncReport {
    pub active: usize,
    pub added: usize,
    pub removed: usize,
}

/// Registry of known devices.
pub struct DeviceRegistry {
    devices: DashMap<DeviceId, DeviceRecord>,
    listeners: RwLock<Vec<DeviceListener>>,
    topology: Arc<dyn TopologySource>,
    store: Arc<dyn ConfigStore>,
    stage_table: Vec<StageId>,
    generation: AtomicU64,
    resync_lock: Mutex<()>,
}

impl DeviceRegistry {
    /// Create a registry that prepares new devices with `stage_table`.
    pub fn new(
        topology: Arc<dyn TopologySource>,
        store: Arc<dyn ConfigStore>,
        stage_table: Vec<StageId>,
    ) -> Arc<Self> {
        Arc::new(Self {
            devices: DashMap::new(),
            listeners: RwLock::new(Vec::new()),
            topology,
            store,
            stage_table,
            generation: AtomicU64::new(1),
            resync_lock: Mutex::new(()),
        })
    }

    pub fn register_listener(&self, listener: DeviceListener) {
        self.listeners.write().push(listener);
    }

    /// Snapshot of the devices that are currently ready, sorted by id.
    pub fn ready_devices(&self) -> Vec<DeviceId> {
        let mut ready: Vec<_> = self
            .devices
            .iter()
            .filter(|r| r.status == DeviceStatus::Ready)
            .map(|r| r.id.clone())
            .collect();
        ready.sort();
        ready
    }

    pub fn is_ready(&self, id: &DeviceId) -> bool {
        self.devices
            .get(id)
            .is_some_and(|r| r.status == DeviceStatus::Ready)
    }

    pub fn get(&self, id: &DeviceId) -> Option<DeviceRecord> {
        self.devices.get(id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Read the inventory and reconcile the registry against it.
    ///
    /// On a read failure the registry is left untouched.
    #[instrument(skip(self), name = "topology_resync")]
    pub async fn resync(self: &Arc<Self>) -> Result<ResyncReport, TopologyError> {
        let _guard = self.resync_lock.lock().await;

        let topology = match self.topology.read_topology().await {
            Ok(topology) => topology,
            Err(e) => {
                warn!(error = %e, "Could not read topology, will retry on next change");
                return Err(e);
            }
        };

        let active: HashMap<DeviceId, DeviceDescription> = topology
            .active_devices()
            .map(|d| (d.id.clone(), d.clone()))
            .collect();

        let mut added = Vec::new();
        for (id, description) in &active {
            match self.devices.entry(id.clone()) {
                Entry::Occupied(mut entry) => {
                    entry.get_mut().description = description.clone();
                }
                Entry::Vacant(entry) => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    entry.insert(DeviceRecord {
                        id: id.clone(),
                        status: DeviceStatus::Preparing,
                        description: description.clone(),
                        generation,
                    });
                    added.push((id.clone(), generation));
                }
            }
        }

        let gone: Vec<DeviceId> = self
            .devices
            .iter()
            .filter(|r| !active.contains_key(r.key()))
            .map(|r| r.key().clone())
            .collect();

        let mut removed = 0;
        for id in gone {
            if let Some((_, record)) = self.devices.remove(&id) {
                info!(device_id = %id, "Device removed");
                removed += 1;
                if record.status == DeviceStatus::Ready {
                    self.notify(&record, |l| l.removed.clone());
                }
            }
        }

        for (id, generation) in &added {
            info!(device_id = %id, "New device connected");
            self.prepare(id.clone(), *generation);
        }

        let report = ResyncReport {
            active: active.len(),
            added: added.len(),
            removed,
        };
        debug!(
            active = report.active,
            added = report.added,
            removed = report.removed,
            "Topology resync complete"
        );
        Ok(report)
    }

    /// Apply the store's acknowledgment of the stage table written for
    /// incarnation `generation` of `id`.
    ///
    /// Runs under the resync lock, so a concurrent resync either sees the
    /// device Ready (and reports its removal after the ready callbacks) or
    /// purges it first (and the acknowledgment is dropped). Returns true only
    /// for the call that performed the Preparing → Ready transition.
    async fn acknowledge(&self, id: &DeviceId, generation: u64) -> bool {
        let _guard = self.resync_lock.lock().await;

        let record = {
            let Some(mut record) = self.devices.get_mut(id) else {
                return false;
            };
            if record.status != DeviceStatus::Preparing || record.generation != generation {
                return false;
            }
            record.status = DeviceStatus::Ready;
            record.clone()
        };

        info!(device_id = %id, generation, "Device ready");
        self.notify(&record, |l| l.ready.clone());
        true
    }

    /// Write the stage table for a new device, then mark it ready.
    fn prepare(self: &Arc<Self>, id: DeviceId, generation: u64) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            match registry
                .store
                .write_stage_table(&id, &registry.stage_table)
                .await
            {
                Ok(()) => {
                    registry.acknowledge(&id, generation).await;
                }
                Err(e) => {
                    warn!(
                        device_id = %id,
                        error = %e,
                        "Could not write stage table, will retry on next resync"
                    );
                    // Forget the device so the next resync treats it as new.
                    let _guard = registry.resync_lock.lock().await;
                    registry.devices.remove_if(&id, |_, r| {
                        r.generation == generation && r.status == DeviceStatus::Preparing
                    });
                }
            }
        });
    }

    fn notify(
        &self,
        record: &DeviceRecord,
        select: impl Fn(&DeviceListener) -> Option<DeviceCallback>,
    ) {
        let callbacks: Vec<DeviceCallback> =
            self.listeners.read().iter().filter_map(select).collect();
        for callback in callbacks {
            callback(record);
        }
    }

    /// Spawn the resync driver.
    ///
    /// Change notifications from the topology source are debounced by
    /// `delay`; a notification during a resync queues one more resync.
    pub fn watch(
        self: &Arc<Self>,
        delay: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> (TopologyWatch, JoinHandle<()>) {
        let work = Arc::new(ResyncTask {
            registry: Arc::clone(self),
        });
        let (task, handle) = SingletonTask::spawn(work, delay, shutdown);
        (TopologyWatch { task }, handle)
    }
}

/// Handle the topology source notifies on inventory changes.
#[derive(Clone)]
pub struct TopologyWatch {
    task: SingletonTask,
}

impl TopologyWatch {
    /// The inventory changed; schedule a resync.
    pub fn topology_changed(&self) {
        self.task.reschedule();
    }

    /// Number of resyncs attempted so far.
    pub fn completed_resyncs(&self) -> u64 {
        self.task.completed_runs()
    }
}

struct ResyncTask {
    registry: Arc<DeviceRegistry>,
}

#[async_trait]
impl Reconcile for ResyncTask {
    fn name(&self) -> &str {
        "topology_resync"
    }

    async fn reconcile(&self) -> Result<(), ReconcileError> {
        self.registry
            .resync()
            .await
            .map(|_| ())
            .map_err(|e| ReconcileError::Unavailable(e.to_string()))
    }
}
