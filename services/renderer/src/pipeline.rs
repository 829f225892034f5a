//! Pipeline dispatch.
//!
//! A pass fans out one task per ready device. Each task runs every stage of
//! the pipeline, in order, against the device and the shared snapshot.
//! Failures are contained twice over: a failing or panicking stage does not
//! stop the stages after it, and a failing device does not affect the
//! others. The number of device tasks in flight is bounded by the worker
//! budget.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use gbp_id::{DeviceId, StageId};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, instrument, trace};

use crate::devices::DeviceRegistry;
use crate::dirty::DirtyState;
use crate::error::StageError;

/// One step of device programming.
///
/// `update` must be idempotent: the same device may see the same change in
/// more than one pass.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Table id this stage programs on the device.
    fn table_id(&self) -> StageId;

    /// Stage name for logging.
    fn name(&self) -> &str;

    /// Bring `device` up to date with the changes in `dirty`.
    async fn update(&self, device: &DeviceId, dirty: &DirtyState) -> Result<(), StageError>;
}

/// The ordered, immutable list of stages.
#[derive(Clone)]
pub struct Pipeline {
    stages: Arc<[Arc<dyn Stage>]>,
}

impl Pipeline {
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self {
            stages: stages.into(),
        }
    }

    /// Table ids in pipeline order, written to every new device.
    pub fn stage_table(&self) -> Vec<StageId> {
        self.stages.iter().map(|s| s.table_id()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// A stage that failed on one device during a pass.
#[derive(Debug)]
pub struct StageFailure {
    pub device: DeviceId,
    pub stage: String,
    pub table_id: StageId,
    pub error: StageError,
}

/// Outcome of one dispatch.
#[derive(Debug, Default)]
pub struct PassReport {
    /// Devices whose stages all ran (successfully or not).
    pub devices_programmed: usize,
    /// Devices that stopped being ready before their task started.
    pub devices_skipped: usize,
    pub failures: Vec<StageFailure>,
}

impl PassReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

enum DeviceOutcome {
    Programmed(Vec<StageFailure>),
    Skipped,
}

/// Runs the pipeline against every ready device.
pub struct Dispatcher {
    pipeline: Pipeline,
    registry: Arc<DeviceRegistry>,
    workers: Arc<Semaphore>,
}

impl Dispatcher {
    /// `workers` bounds the number of devices programmed at once.
    pub fn new(pipeline: Pipeline, registry: Arc<DeviceRegistry>, workers: usize) -> Self {
        Self {
            pipeline,
            registry,
            workers: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Program every ready device with `dirty` and wait for all of them.
    #[instrument(skip_all, name = "dispatch")]
    pub async fn dispatch(&self, dirty: Arc<DirtyState>) -> PassReport {
        let devices = self.registry.ready_devices();
        debug!(devices = devices.len(), stages = self.pipeline.len(), "Dispatching pass");

        let mut tasks = JoinSet::new();
        for device in devices {
            // Closed only if the semaphore is dropped, which it is not while
            // `self` lives.
            let Ok(permit) = Arc::clone(&self.workers).acquire_owned().await else {
                break;
            };
            let pipeline = self.pipeline.clone();
            let registry = Arc::clone(&self.registry);
            let dirty = Arc::clone(&dirty);

            tasks.spawn(async move {
                let outcome = if registry.is_ready(&device) {
                    DeviceOutcome::Programmed(program_device(&pipeline, &device, &dirty).await)
                } else {
                    trace!(device_id = %device, "Device no longer ready, skipping");
                    DeviceOutcome::Skipped
                };
                drop(permit);
                outcome
            });
        }

        let mut report = PassReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(DeviceOutcome::Programmed(failures)) => {
                    report.devices_programmed += 1;
                    report.failures.extend(failures);
                }
                Ok(DeviceOutcome::Skipped) => report.devices_skipped += 1,
                // Stage panics are caught inside the task; this is a bug in
                // the dispatcher itself.
                Err(e) => error!(error = %e, "Device task failed"),
            }
        }
        report
    }
}

async fn program_device(
    pipeline: &Pipeline,
    device: &DeviceId,
    dirty: &DirtyState,
) -> Vec<StageFailure> {
    let mut failures = Vec::new();

    for stage in pipeline.stages.iter() {
        let result = AssertUnwindSafe(stage.update(device, dirty))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(StageError::Panicked(panic_message(panic))));

        if let Err(e) = result {
            error!(
                device_id = %device,
                stage = stage.name(),
                table_id = %stage.table_id(),
                error = %e,
                "Failed to update device"
            );
            failures.push(StageFailure {
                device: device.clone(),
                stage: stage.name().to_string(),
                table_id: stage.table_id(),
                error: e,
            });
        }
    }

    failures
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use parking_lot::Mutex;

    use crate::memory::{MemoryConfigStore, MemoryTopology};
    use gbp_events::DeviceDescription;

    /// Records every (device, stage) call in order.
    struct Probe {
        id: u8,
        name: &'static str,
        calls: Arc<Mutex<Vec<(DeviceId, &'static str)>>>,
        fail_on: Option<DeviceId>,
        panic: bool,
    }

    #[async_trait]
    impl Stage for Probe {
        fn table_id(&self) -> StageId {
            StageId::new(self.id)
        }

        fn name(&self) -> &str {
            self.name
        }

        async fn update(&self, device: &DeviceId, _dirty: &DirtyState) -> Result<(), StageError> {
            self.calls.lock().push((device.clone(), self.name));
            if self.fail_on.as_ref() == Some(device) {
                if self.panic {
                    panic!("stage blew up");
                }
                return Err(StageError::failed("write rejected"));
            }
            Ok(())
        }
    }

    async fn ready_registry(devices: &[&str]) -> Arc<DeviceRegistry> {
        let topology = Arc::new(MemoryTopology::new());
        for d in devices {
            topology.upsert(DeviceDescription::active(*d, "ovs"));
        }
        let registry = DeviceRegistry::new(topology, Arc::new(MemoryConfigStore::new()), vec![]);
        registry.resync().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        registry
    }

    fn probe(
        id: u8,
        name: &'static str,
        calls: &Arc<Mutex<Vec<(DeviceId, &'static str)>>>,
        fail_on: Option<&str>,
        panic: bool,
    ) -> Arc<dyn Stage> {
        Arc::new(Probe {
            id,
            name,
            calls: Arc::clone(calls),
            fail_on: fail_on.map(DeviceId::new),
            panic,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_stages_run_in_order_per_device() {
        let registry = ready_registry(&["openflow:1", "openflow:2"]).await;
        let calls = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(vec![
            probe(0, "first", &calls, None, false),
            probe(1, "second", &calls, None, false),
        ]);
        assert_eq!(pipeline.stage_table(), vec![StageId::new(0), StageId::new(1)]);

        let dispatcher = Dispatcher::new(pipeline, registry, 4);
        let report = dispatcher.dispatch(Arc::new(DirtyState::default())).await;

        assert_eq!(report.devices_programmed, 2);
        assert!(report.is_clean());

        let calls = calls.lock();
        for device in ["openflow:1", "openflow:2"] {
            let order: Vec<_> = calls
                .iter()
                .filter(|(d, _)| d.as_str() == device)
                .map(|(_, s)| *s)
                .collect();
            assert_eq!(order, vec!["first", "second"]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_failure_is_isolated() {
        let registry = ready_registry(&["openflow:1", "openflow:2"]).await;
        let calls = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(vec![
            probe(0, "first", &calls, Some("openflow:1"), false),
            probe(1, "second", &calls, None, false),
        ]);

        let dispatcher = Dispatcher::new(pipeline, registry, 4);
        let report = dispatcher.dispatch(Arc::new(DirtyState::default())).await;

        assert_eq!(report.devices_programmed, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].device, DeviceId::new("openflow:1"));
        assert_eq!(report.failures[0].stage, "first");
        // The later stage still ran on the failing device.
        assert!(calls
            .lock()
            .contains(&(DeviceId::new("openflow:1"), "second")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_panic_is_contained() {
        let registry = ready_registry(&["openflow:1", "openflow:2"]).await;
        let calls = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(vec![
            probe(0, "first", &calls, Some("openflow:2"), true),
            probe(1, "second", &calls, None, false),
        ]);

        let dispatcher = Dispatcher::new(pipeline, registry, 1);
        let report = dispatcher.dispatch(Arc::new(DirtyState::default())).await;

        assert_eq!(report.devices_programmed, 2);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0].error, StageError::Panicked(_)));
        assert_eq!(calls.lock().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ready_devices_is_a_noop() {
        let registry = ready_registry(&[]).await;
        let calls = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(vec![probe(0, "first", &calls, None, false)]);

        let dispatcher = Dispatcher::new(pipeline, registry, 2);
        let report = dispatcher.dispatch(Arc::new(DirtyState::default())).await;

        assert_eq!(report.devices_programmed, 0);
        assert!(calls.lock().is_empty());
    }
}
