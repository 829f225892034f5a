//! Context ordinals.
//!
//! Stages that encode policy objects into compact device state need a small
//! integer per (tenant, object) pair. Ordinals are handed out from one
//! process-wide counter starting at 1 and never reused or reassigned.
//!
//! The table is process-local: two renderer instances would hand out
//! conflicting ordinals. Coordinating them (an elected allocator or a shared
//! counter) is not handled here.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gbp_id::{TenantId, UniqueId};
use tracing::error;

/// Returned for empty identifiers and when the counter is exhausted.
pub const NO_ORDINAL: i32 = 0;

/// First ordinal handed out.
pub const FIRST_ORDINAL: i32 = 1;

type TenantTable = Arc<DashMap<UniqueId, i32>>;

/// Allocates and caches ordinals per tenant.
#[derive(Debug)]
pub struct OrdinalAllocator {
    next: AtomicI32,
    tenants: DashMap<TenantId, TenantTable>,
}

impl Default for OrdinalAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl OrdinalAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicI32::new(FIRST_ORDINAL),
            tenants: DashMap::new(),
        }
    }

    /// Returns the ordinal for `(tenant, id)`, allocating it on first use.
    ///
    /// Concurrent first requests for the same pair all observe the single
    /// value that was inserted; the counter only advances for the winner.
    pub fn ordinal(&self, tenant: &TenantId, id: &UniqueId) -> i32 {
        if tenant.is_empty() || id.is_empty() {
            return NO_ORDINAL;
        }

        let table = self.tenant_table(tenant);
        if let Some(ordinal) = table.get(id) {
            return *ordinal;
        }

        let ordinal = match table.entry(id.clone()) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => match self.allocate() {
                Some(ordinal) => *entry.insert(ordinal),
                None => {
                    error!(tenant = %tenant, id = %id, "Ordinal space exhausted");
                    NO_ORDINAL
                }
            },
        };
        ordinal
    }

    /// Returns the ordinal for `(tenant, id)` without allocating.
    pub fn lookup(&self, tenant: &TenantId, id: &UniqueId) -> Option<i32> {
        let table = self.tenants.get(tenant)?;
        let ordinal = table.get(id)?;
        Some(*ordinal)
    }

    /// Number of ordinals handed out so far.
    pub fn allocated(&self) -> usize {
        self.tenants.iter().map(|t| t.value().len()).sum()
    }

    fn tenant_table(&self, tenant: &TenantId) -> TenantTable {
        if let Some(table) = self.tenants.get(tenant) {
            return Arc::clone(table.value());
        }
        Arc::clone(self.tenants.entry(tenant.clone()).or_default().value())
    }

    fn allocate(&self) -> Option<i32> {
        self.next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_add(1))
            .ok()
    }
}
