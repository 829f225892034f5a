//! # gbp-id
//!
//! Typed identifiers for the policy renderer.
//!
//! ## Design Principles
//!
//! - Identifiers are opaque strings owned by external systems (the topology
//!   inventory, the endpoint directory, the policy model)
//! - Every identifier kind is its own type so a `DeviceId` can never be
//!   passed where an `EndpointKey` is expected
//! - Cloning is cheap (`Arc<str>`); keys are copied into dirty-state sets on
//!   every change notification
//! - Strict parsing rejects empty or whitespace-bearing input; the unchecked
//!   constructor exists for adapters that must forward whatever they receive
//!
//! ## Examples
//!
//! - `DeviceId`: `openflow:1`
//! - `EndpointKey`: `l2bd-1/00:00:00:00:00:01`
//! - `GroupKey`: `tenant-a/web` (tenant and group joined by `/`)

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;
