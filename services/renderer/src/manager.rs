//! Policy manager: wires change notifications to reconciliation passes.
//!
//! ```text
//!   ChangeNotifier ──► DirtyTracker ──► flow-update SingletonTask
//!   DeviceRegistry ──(ready/removed)──┘          │
//!                                                ▼
//!                                take_snapshot ─► Dispatcher ─► stages
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gbp_events::ChangeEvent;
use gbp_id::{DeviceId, EndpointKey, GroupKey, TenantId, UniqueId};
use gbp_reconcile::{Reconcile, ReconcileError, SingletonTask, DEFAULT_UPDATE_DELAY};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::devices::{DeviceListener, DeviceRegistry, TopologyWatch};
use crate::dirty::{DirtySummary, DirtyTracker};
use crate::ordinal::OrdinalAllocator;
use crate::pipeline::{Dispatcher, Pipeline};
use crate::sources::{ConfigStore, PolicyScope, TopologySource};

/// Timing and sizing for a [`PolicyManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Debounce between the last change and the pass it triggers.
    pub update_delay: Duration,
    /// Debounce between a topology change and the resync.
    pub resync_delay: Duration,
    /// Devices programmed concurrently within one pass.
    pub dispatch_workers: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            update_delay: DEFAULT_UPDATE_DELAY,
            resync_delay: Duration::ZERO,
            dispatch_workers: 8,
        }
    }
}

/// External systems the manager talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub topology: Arc<dyn TopologySource>,
    pub store: Arc<dyn ConfigStore>,
    pub scope: Arc<dyn PolicyScope>,
    /// Shared with stages that need context ordinals.
    pub ordinals: Arc<OrdinalAllocator>,
}

impl Collaborators {
    /// Collaborators with a fresh ordinal table.
    pub fn new(
        topology: Arc<dyn TopologySource>,
        store: Arc<dyn ConfigStore>,
        scope: Arc<dyn PolicyScope>,
    ) -> Self {
        Self {
            topology,
            store,
            scope,
            ordinals: Arc::new(OrdinalAllocator::new()),
        }
    }
}

/// One reconciliation pass: snapshot the dirty state and dispatch it.
struct FlowUpdate {
    dirty: Arc<DirtyTracker>,
    dispatcher: Dispatcher,
}

#[async_trait]
impl Reconcile for FlowUpdate {
    fn name(&self) -> &str {
        "flow_update"
    }

    async fn reconcile(&self) -> Result<(), ReconcileError> {
        let snapshot = self.dirty.take_snapshot();
        let summary = snapshot.summary();
        debug!(
            endpoints = summary.endpoints,
            devices = summary.devices,
            groups = summary.groups,
            membership_groups = summary.group_endpoints,
            attachment_devices = summary.device_endpoints,
            "Beginning reconciliation pass"
        );

        let report = self.dispatcher.dispatch(Arc::new(snapshot)).await;

        if report.is_clean() {
            debug!(
                programmed = report.devices_programmed,
                skipped = report.devices_skipped,
                "Reconciliation pass complete"
            );
        } else {
            warn!(
                programmed = report.devices_programmed,
                skipped = report.devices_skipped,
                failures = report.failures.len(),
                "Reconciliation pass complete with failures"
            );
        }
        Ok(())
    }
}

/// Records changes and arms the reconciliation pass.
///
/// Every method returns immediately; none of them waits for the pass.
#[derive(Clone)]
pub struct ChangeNotifier {
    dirty: Arc<DirtyTracker>,
    flow: SingletonTask,
    scope: Arc<dyn PolicyScope>,
}

impl ChangeNotifier {
    /// An endpoint's attributes changed.
    pub fn endpoint_updated(&self, endpoint: EndpointKey) {
        self.dirty.add_endpoint(endpoint);
        self.flow.reschedule();
    }

    /// An endpoint attached to, moved on, or left `device`.
    pub fn device_endpoint_updated(&self, device: DeviceId, endpoint: EndpointKey) {
        self.dirty.add_device_endpoint(device, endpoint);
        self.flow.reschedule();
    }

    /// An endpoint joined or left `group`.
    pub fn group_endpoint_updated(&self, group: GroupKey, endpoint: EndpointKey) {
        self.scope.add_to_scope(&group);
        self.dirty.add_group_endpoint(group, endpoint);
        self.flow.reschedule();
    }

    /// Resolved policy changed for `groups`.
    pub fn policy_updated(&self, groups: impl IntoIterator<Item = GroupKey>) {
        for group in groups {
            self.dirty.add_group(group);
        }
        self.flow.reschedule();
    }

    /// Forward a decoded change event.
    pub fn apply(&self, event: ChangeEvent) {
        match event {
            ChangeEvent::EndpointUpdated { endpoint } => self.endpoint_updated(endpoint),
            ChangeEvent::DeviceEndpointUpdated { device, endpoint } => {
                self.device_endpoint_updated(device, endpoint)
            }
            ChangeEvent::GroupEndpointUpdated { group, endpoint } => {
                self.group_endpoint_updated(group, endpoint)
            }
            ChangeEvent::PolicyUpdated { groups } => self.policy_updated(groups),
        }
    }
}

/// The renderer's reconciliation core.
pub struct PolicyManager {
    notifier: ChangeNotifier,
    registry: Arc<DeviceRegistry>,
    topology_watch: TopologyWatch,
    ordinals: Arc<OrdinalAllocator>,
}

impl PolicyManager {
    /// Start the flow-update and topology-resync tasks.
    ///
    /// One pass is scheduled immediately so devices that are already ready
    /// get programmed without waiting for a change. Both tasks stop when
    /// `shutdown` turns true.
    pub fn start(
        config: ManagerConfig,
        pipeline: Pipeline,
        collaborators: Collaborators,
        shutdown: watch::Receiver<bool>,
    ) -> (Arc<Self>, Vec<JoinHandle<()>>) {
        let Collaborators {
            topology,
            store,
            scope,
            ordinals,
        } = collaborators;

        let registry = DeviceRegistry::new(topology, store, pipeline.stage_table());
        let dirty = Arc::new(DirtyTracker::new());

        let work = Arc::new(FlowUpdate {
            dirty: Arc::clone(&dirty),
            dispatcher: Dispatcher::new(pipeline, Arc::clone(&registry), config.dispatch_workers),
        });
        let (flow, flow_handle) = SingletonTask::spawn(work, config.update_delay, shutdown.clone());

        let (topology_watch, resync_handle) = registry.watch(config.resync_delay, shutdown);

        registry.register_listener(device_dirtier(&dirty, &flow));

        info!(
            update_delay_ms = config.update_delay.as_millis() as u64,
            dispatch_workers = config.dispatch_workers,
            "Policy manager started"
        );
        flow.reschedule();

        let manager = Arc::new(Self {
            notifier: ChangeNotifier { dirty, flow, scope },
            registry,
            topology_watch,
            ordinals,
        });

        (manager, vec![flow_handle, resync_handle])
    }

    /// Handle for change notifications.
    pub fn notifier(&self) -> ChangeNotifier {
        self.notifier.clone()
    }

    /// The device inventory changed; schedule a resync.
    pub fn topology_changed(&self) {
        self.topology_watch.topology_changed();
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn register_device_listener(&self, listener: DeviceListener) {
        self.registry.register_listener(listener);
    }

    /// Ordinal for `(tenant, id)`, allocated on first use.
    pub fn context_ordinal(&self, tenant: &TenantId, id: &UniqueId) -> i32 {
        self.ordinals.ordinal(tenant, id)
    }

    /// Number of reconciliation passes that have finished.
    pub fn completed_passes(&self) -> u64 {
        self.notifier.flow.completed_runs()
    }

    /// Number of topology resyncs that have finished.
    pub fn completed_resyncs(&self) -> u64 {
        self.topology_watch.completed_resyncs()
    }

    /// Sizes of the changes not yet taken by a pass.
    pub fn pending_changes(&self) -> DirtySummary {
        self.notifier.dirty.pending_summary()
    }
}

/// Marks a device dirty and reschedules when it becomes ready or goes away.
fn device_dirtier(dirty: &Arc<DirtyTracker>, flow: &SingletonTask) -> DeviceListener {
    let (ready_dirty, ready_flow) = (Arc::clone(dirty), flow.clone());
    let (removed_dirty, removed_flow) = (Arc::clone(dirty), flow.clone());
    DeviceListener::new()
        .on_ready(move |record| {
            ready_dirty.add_device(record.id.clone());
            ready_flow.reschedule();
        })
        .on_removed(move |record| {
            removed_dirty.add_device(record.id.clone());
            removed_flow.reschedule();
        })
}
