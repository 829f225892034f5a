//! gbp-renderer
//!
//! Runs the reconciliation core against a file-backed device inventory and
//! an in-memory configuration store.
//!
//! ## Architecture
//!
//! - **Topology poller**: asks for a resync at start-up and every
//!   `GBP_TOPOLOGY_POLL_SECS`
//! - **Policy manager**: debounced flow-update passes and topology resyncs
//! - **Stages**: logging stages standing in for device programming

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use gbp_id::StageId;
use gbp_renderer::config::Config;
use gbp_renderer::memory::{FileTopology, MemoryConfigStore, MemoryScope, MemoryTopology};
use gbp_renderer::stages::LoggingStage;
use gbp_renderer::{Collaborators, Pipeline, PolicyManager, Stage, TopologySource};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str())),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        flow_update_delay_ms = config.flow_update_delay.as_millis() as u64,
        dispatch_workers = config.dispatch_workers,
        topology_file = ?config.topology_file,
        "Starting gbp renderer"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let topology: Arc<dyn TopologySource> = match &config.topology_file {
        Some(path) => Arc::new(FileTopology::new(path)),
        None => {
            warn!("GBP_TOPOLOGY_FILE not set, running with an empty inventory");
            Arc::new(MemoryTopology::new())
        }
    };
    let collaborators = Collaborators::new(
        topology,
        Arc::new(MemoryConfigStore::new()),
        Arc::new(MemoryScope::new()),
    );

    let stages: Vec<Arc<dyn Stage>> = vec![
        Arc::new(LoggingStage::new("port_security", StageId::new(0))),
        Arc::new(
            LoggingStage::new("source_mapper", StageId::new(1))
                .with_ordinals(Arc::clone(&collaborators.ordinals)),
        ),
    ];

    let (manager, mut handles) = PolicyManager::start(
        config.manager_config(),
        Pipeline::new(stages),
        collaborators,
        shutdown_rx.clone(),
    );

    handles.push(tokio::spawn({
        let manager = Arc::clone(&manager);
        let interval = config.topology_poll_interval;
        let mut shutdown_rx = shutdown_rx;
        async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => manager.topology_changed(),
                    _ = shutdown_rx.changed() => break,
                }
            }
        }
    }));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Could not listen for shutdown signal");
    }
    info!("Received shutdown signal");

    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    let workers = futures_util::future::join_all(handles);
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, workers).await.is_err() {
        warn!("Workers did not stop in time");
    }

    info!("Renderer shutdown complete");
    Ok(())
}
