//! Errors raised by the renderer's external collaborators and stages.
//!
//! None of these are fatal: topology and store failures abandon the current
//! resync, stage failures are logged against their device and stage.

use gbp_events::EventError;
use gbp_id::DeviceId;
use thiserror::Error;

/// Reading the device inventory failed.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("topology source unavailable: {0}")]
    Unavailable(String),

    #[error("invalid topology document: {0}")]
    Invalid(#[from] EventError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Writing device configuration to the configuration store failed.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("write for {device} rejected: {reason}")]
    Rejected { device: DeviceId, reason: String },

    #[error("configuration store unavailable: {0}")]
    Unavailable(String),
}

/// A pipeline stage failed to update a device.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("{0}")]
    Failed(String),

    #[error("stage panicked: {0}")]
    Panicked(String),
}

impl StageError {
    /// Convenience constructor for stage implementations.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}
