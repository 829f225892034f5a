//! # gbp-events
//!
//! Types exchanged between the renderer and its external collaborators.
//!
//! ## Design Principles
//!
//! - Change events carry keys only, never resolved policy or device state
//! - Every event names what changed; consumers decide what to recompute
//! - Topology descriptions are read wholesale and diffed by the consumer
//!
//! ## Event Types
//!
//! - Endpoint directory: `endpoint.updated`, `device_endpoint.updated`,
//!   `group_endpoint.updated`
//! - Policy resolution: `policy.updated`
//!
//! ## Topology
//!
//! A [`Topology`] is the full device inventory as last read from the
//! topology source. A device is active once it reports a capability
//! descriptor with a description.

mod error;
mod topology;
mod types;

pub use error::EventError;
pub use topology::*;
pub use types::*;
