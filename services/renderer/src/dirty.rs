//! Dirty-state tracking.
//!
//! Every change notification lands in the *active* [`DirtyState`]. When a
//! reconciliation pass starts it swaps in a fresh instance and takes the old
//! one for itself, so changes recorded after the swap go to the next pass
//! and nothing recorded before it is processed twice.
//!
//! Producers never take a lock on the slot. Each collection is a sharded
//! concurrent map, so inserts for different keys do not contend.

use std::collections::BTreeSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::{DashMap, DashSet};
use gbp_id::{DeviceId, EndpointKey, GroupKey};

/// Everything that changed since the last pass.
///
/// Append-only while active. Only the [`DirtyTracker`] inside this crate can
/// insert, so the snapshot every stage receives is read-only to it:
///
/// ```
/// use gbp_renderer::DirtyState;
///
/// let dirty = DirtyState::default();
/// assert!(dirty.endpoints().is_empty());
/// assert!(!dirty.contains_device(&gbp_id::DeviceId::new("openflow:1")));
/// ```
///
/// ```compile_fail
/// use gbp_renderer::DirtyState;
///
/// let dirty = DirtyState::default();
/// dirty.add_endpoint(gbp_id::EndpointKey::new("injected"));
/// ```
#[derive(Debug, Default)]
pub struct DirtyState {
    endpoints: DashSet<EndpointKey>,
    devices: DashSet<DeviceId>,
    groups: DashSet<GroupKey>,
    group_endpoints: DashMap<GroupKey, DashSet<EndpointKey>>,
    device_endpoints: DashMap<DeviceId, DashSet<EndpointKey>>,
}

impl DirtyState {
    pub(crate) fn add_endpoint(&self, endpoint: EndpointKey) {
        self.endpoints.insert(endpoint);
    }

    pub(crate) fn add_device(&self, device: DeviceId) {
        self.devices.insert(device);
    }

    pub(crate) fn add_group(&self, group: GroupKey) {
        self.groups.insert(group);
    }

    pub(crate) fn add_group_endpoint(&self, group: GroupKey, endpoint: EndpointKey) {
        self.group_endpoints.entry(group).or_default().insert(endpoint);
    }

    pub(crate) fn add_device_endpoint(&self, device: DeviceId, endpoint: EndpointKey) {
        self.device_endpoints
            .entry(device)
            .or_default()
            .insert(endpoint);
    }

    pub fn contains_endpoint(&self, endpoint: &EndpointKey) -> bool {
        self.endpoints.contains(endpoint)
    }

    pub fn contains_device(&self, device: &DeviceId) -> bool {
        self.devices.contains(device)
    }

    pub fn contains_group(&self, group: &GroupKey) -> bool {
        self.groups.contains(group)
    }

    /// Endpoints whose attributes changed.
    pub fn endpoints(&self) -> BTreeSet<EndpointKey> {
        self.endpoints.iter().map(|e| e.key().clone()).collect()
    }

    /// Devices that became ready or were removed.
    pub fn devices(&self) -> BTreeSet<DeviceId> {
        self.devices.iter().map(|d| d.key().clone()).collect()
    }

    /// Groups whose resolved policy changed.
    pub fn groups(&self) -> BTreeSet<GroupKey> {
        self.groups.iter().map(|g| g.key().clone()).collect()
    }

    /// Groups with membership changes.
    pub fn membership_groups(&self) -> BTreeSet<GroupKey> {
        self.group_endpoints.iter().map(|g| g.key().clone()).collect()
    }

    /// Endpoints that joined or left `group`.
    pub fn group_endpoints(&self, group: &GroupKey) -> BTreeSet<EndpointKey> {
        self.group_endpoints
            .get(group)
            .map(|set| set.iter().map(|e| e.key().clone()).collect())
            .unwrap_or_default()
    }

    /// Devices with attachment changes.
    pub fn attachment_devices(&self) -> BTreeSet<DeviceId> {
        self.device_endpoints
            .iter()
            .map(|d| d.key().clone())
            .collect()
    }

    /// Endpoints that attached to or detached from `device`.
    pub fn device_endpoints(&self, device: &DeviceId) -> BTreeSet<EndpointKey> {
        self.device_endpoints
            .get(device)
            .map(|set| set.iter().map(|e| e.key().clone()).collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
            && self.devices.is_empty()
            && self.groups.is_empty()
            && self.group_endpoints.is_empty()
            && self.device_endpoints.is_empty()
    }

    /// Collection sizes, for logging.
    pub fn summary(&self) -> DirtySummary {
        DirtySummary {
            endpoints: self.endpoints.len(),
            devices: self.devices.len(),
            groups: self.groups.len(),
            group_endpoints: self.group_endpoints.len(),
            device_endpoints: self.device_endpoints.len(),
        }
    }
}

/// Sizes of the collections in a [`DirtyState`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirtySummary {
    pub endpoints: usize,
    pub devices: usize,
    pub groups: usize,
    pub group_endpoints: usize,
    pub device_endpoints: usize,
}

/// The swappable slot holding the active [`DirtyState`].
#[derive(Debug, Default)]
pub struct DirtyTracker {
    active: ArcSwap<DirtyState>,
}

impl DirtyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_endpoint(&self, endpoint: EndpointKey) {
        self.active.load_full().add_endpoint(endpoint);
    }

    pub fn add_device(&self, device: DeviceId) {
        self.active.load_full().add_device(device);
    }

    pub fn add_group(&self, group: GroupKey) {
        self.active.load_full().add_group(group);
    }

    pub fn add_group_endpoint(&self, group: GroupKey, endpoint: EndpointKey) {
        self.active.load_full().add_group_endpoint(group, endpoint);
    }

    pub fn add_device_endpoint(&self, device: DeviceId, endpoint: EndpointKey) {
        self.active.load_full().add_device_endpoint(device, endpoint);
    }

    /// Swap in an empty state and return the previous one.
    ///
    /// Producers that loaded the previous instance before the swap may still
    /// be inserting into it; this spins until they drop their handle so the
    /// returned state is complete and exclusively owned. The spin blocks the
    /// calling thread, which is bounded only because every producer holds
    /// the loaded `Arc` for a single synchronous insert and never across an
    /// `.await`.
    pub fn take_snapshot(&self) -> DirtyState {
        let mut previous = self.active.swap(Arc::new(DirtyState::default()));
        loop {
            match Arc::try_unwrap(previous) {
                Ok(state) => return state,
                Err(shared) => {
                    previous = shared;
                    std::thread::yield_now();
                }
            }
        }
    }

    /// Returns true if nothing has been recorded since the last snapshot.
    pub fn is_clean(&self) -> bool {
        self.active.load().is_empty()
    }

    /// Collection sizes of the active state.
    pub fn pending_summary(&self) -> DirtySummary {
        self.active.load().summary()
    }
}
