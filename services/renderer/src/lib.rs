//! gbp-renderer reconciliation core.
//!
//! Turns a stream of change notifications into debounced, single-flight
//! reconciliation passes over every ready device.
//!
//! ## Architecture
//!
//! - **Dirty state** ([`dirty`]): lock-free accumulation of what changed,
//!   swapped out atomically at the start of each pass
//! - **Device registry** ([`devices`]): inventory diffing and the
//!   Preparing → Ready lifecycle, with listener callbacks
//! - **Dispatcher** ([`pipeline`]): bounded per-device fan-out of the
//!   ordered stage list with per-device, per-stage failure isolation
//! - **Ordinals** ([`ordinal`]): stable small integers per (tenant, object)
//! - **Policy manager** ([`manager`]): the glue that drives all of the
//!   above from [`gbp_reconcile::SingletonTask`]s
//!
//! External systems are reached only through the traits in [`sources`];
//! [`memory`] has in-process implementations of each.

pub mod config;
pub mod devices;
pub mod dirty;
pub mod error;
pub mod manager;
pub mod memory;
pub mod ordinal;
pub mod pipeline;
pub mod sources;
pub mod stages;

pub use devices::{DeviceListener, DeviceRecord, DeviceRegistry, DeviceStatus};
pub use dirty::{DirtyState, DirtySummary, DirtyTracker};
pub use error::{StageError, StoreError, TopologyError};
pub use manager::{ChangeNotifier, Collaborators, ManagerConfig, PolicyManager};
pub use ordinal::{OrdinalAllocator, NO_ORDINAL};
pub use pipeline::{Dispatcher, PassReport, Pipeline, Stage, StageFailure};
pub use sources::{ConfigStore, PolicyScope, TopologySource};
