//! Configuration for the renderer.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::manager::ManagerConfig;

/// Renderer configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Debounce between the last change and the reconciliation pass.
    pub flow_update_delay: Duration,

    /// Devices programmed concurrently within one pass.
    pub dispatch_workers: usize,

    /// Debounce between a topology change and the resync.
    pub topology_resync_delay: Duration,

    /// How often the binary re-reads the topology file.
    pub topology_poll_interval: Duration,

    /// JSON device inventory. Without one the inventory is empty.
    pub topology_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            flow_update_delay: Duration::from_millis(250),
            dispatch_workers: 8,
            topology_resync_delay: Duration::ZERO,
            topology_poll_interval: Duration::from_secs(10),
            topology_file: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let flow_update_delay = parse_var(&lookup, "GBP_FLOW_UPDATE_DELAY_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.flow_update_delay);

        let dispatch_workers =
            parse_var(&lookup, "GBP_DISPATCH_WORKERS")?.unwrap_or(defaults.dispatch_workers);
        if dispatch_workers == 0 {
            bail!("GBP_DISPATCH_WORKERS must be at least 1");
        }

        let topology_resync_delay = parse_var(&lookup, "GBP_TOPOLOGY_RESYNC_DELAY_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.topology_resync_delay);

        let topology_poll_interval = parse_var(&lookup, "GBP_TOPOLOGY_POLL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.topology_poll_interval);
        if topology_poll_interval.is_zero() {
            bail!("GBP_TOPOLOGY_POLL_SECS must be at least 1");
        }

        let topology_file = lookup("GBP_TOPOLOGY_FILE")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let log_level = lookup("GBP_LOG_LEVEL").unwrap_or(defaults.log_level);

        Ok(Self {
            flow_update_delay,
            dispatch_workers,
            topology_resync_delay,
            topology_poll_interval,
            topology_file,
            log_level,
        })
    }

    /// The subset the policy manager needs.
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            update_delay: self.flow_update_delay,
            resync_delay: self.topology_resync_delay,
            dispatch_workers: self.dispatch_workers,
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .with_context(|| format!("invalid value for {key}: {raw:?}"))
        })
        .transpose()
}
