//! Reconciliation loop primitives.
//!
//! This library provides the trigger that drives a reconciliation loop from
//! change notifications instead of a fixed interval. Key concepts:
//!
//! - **Reschedule**: "something changed", callable from anywhere, never blocks.
//! - **Debounce**: a burst of reschedules collapses into one run that fires
//!   `delay` after the last of them.
//! - **Single flight**: at most one run is active; reschedules that arrive
//!   while a run is active queue exactly one follow-up run.
//!
//! # Invariants
//!
//! - Two runs of the same task never overlap
//! - A reschedule is never lost: either the pending run or the follow-up run
//!   observes it
//! - After shutdown no new run starts; an active run is allowed to finish

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace};

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// An external collaborator could not be reached; retried on the next run.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A unit of reconciliation work driven by a [`SingletonTask`].
#[async_trait]
pub trait Reconcile: Send + Sync + 'static {
    /// Task name for logging.
    fn name(&self) -> &str;

    /// Run one pass.
    async fn reconcile(&self) -> Result<(), ReconcileError>;
}

/// Scheduling phase of a [`SingletonTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    /// Nothing scheduled.
    Idle,

    /// A run will start at `deadline` unless rescheduled again first.
    Pending { deadline: Instant },

    /// A run is active and nothing new has been requested.
    Running,

    /// A run is active and another was requested at `requested_at`.
    RunningWithPending { requested_at: Instant },
}

impl TaskPhase {
    /// Returns true if a run is active.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running | Self::RunningWithPending { .. })
    }
}

struct Shared {
    name: String,
    delay: Duration,
    phase: Mutex<TaskPhase>,
    wake: Notify,
    closed: AtomicBool,
    completed_runs: AtomicU64,
}

/// Debounced, single-flight trigger for a [`Reconcile`] implementation.
///
/// Cloning yields another handle to the same task.
#[derive(Clone)]
pub struct SingletonTask {
    shared: Arc<Shared>,
}

impl SingletonTask {
    /// Spawn the driver for `work` on the current tokio runtime.
    ///
    /// The driver exits when `shutdown` turns true (or its sender is
    /// dropped), after letting an active run finish.
    pub fn spawn(
        work: Arc<dyn Reconcile>,
        delay: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<()>) {
        let shared = Arc::new(Shared {
            name: work.name().to_string(),
            delay,
            phase: Mutex::new(TaskPhase::Idle),
            wake: Notify::new(),
            closed: AtomicBool::new(false),
            completed_runs: AtomicU64::new(0),
        });

        let handle = tokio::spawn(drive(Arc::clone(&shared), work, shutdown));

        (Self { shared }, handle)
    }

    /// Request a run `delay` from now.
    ///
    /// A pending run has its deadline pushed back; an active run gets one
    /// follow-up queued behind it.
    pub fn reschedule(&self) {
        if self.shared.closed.load(Ordering::Acquire) {
            trace!(task = %self.shared.name, "Ignoring reschedule after shutdown");
            return;
        }

        let now = Instant::now();
        {
            let mut phase = self.shared.phase.lock();
            *phase = match *phase {
                TaskPhase::Idle | TaskPhase::Pending { .. } => TaskPhase::Pending {
                    deadline: now + self.shared.delay,
                },
                TaskPhase::Running | TaskPhase::RunningWithPending { .. } => {
                    TaskPhase::RunningWithPending { requested_at: now }
                }
            };
        }

        trace!(task = %self.shared.name, "Rescheduled");
        self.shared.wake.notify_one();
    }

    /// Current scheduling phase.
    pub fn phase(&self) -> TaskPhase {
        *self.shared.phase.lock()
    }

    /// Number of runs that have finished (successfully or not).
    pub fn completed_runs(&self) -> u64 {
        self.shared.completed_runs.load(Ordering::Acquire)
    }

    /// Returns true once the driver has stopped accepting work.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

async fn drive(shared: Arc<Shared>, work: Arc<dyn Reconcile>, mut shutdown: watch::Receiver<bool>) {
    info!(
        task = %shared.name,
        delay_ms = shared.delay.as_millis() as u64,
        "Starting singleton task"
    );

    loop {
        if *shutdown.borrow() {
            break;
        }

        let phase = { *shared.phase.lock() };
        let deadline = match phase {
            TaskPhase::Pending { deadline } => deadline,
            // Only the driver enters Running, so anything else means idle.
            _ => {
                tokio::select! {
                    _ = shared.wake.notified() => continue,
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                }
            }
        };

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {}
            _ = shared.wake.notified() => continue,
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        }

        {
            let mut phase = shared.phase.lock();
            match *phase {
                TaskPhase::Pending { deadline } if deadline <= Instant::now() => {
                    *phase = TaskPhase::Running;
                }
                // Deadline moved while we slept.
                _ => continue,
            }
        }

        run_once(&shared, &work).await;

        {
            let mut phase = shared.phase.lock();
            *phase = match *phase {
                TaskPhase::RunningWithPending { requested_at } => TaskPhase::Pending {
                    deadline: (requested_at + shared.delay).max(Instant::now()),
                },
                _ => TaskPhase::Idle,
            };
        }
    }

    shared.closed.store(true, Ordering::Release);
    *shared.phase.lock() = TaskPhase::Idle;
    info!(task = %shared.name, "Singleton task shutting down");
}

async fn run_once(shared: &Shared, work: &Arc<dyn Reconcile>) {
    debug!(task = %shared.name, "Running");

    // Run on its own task so a panicking pass cannot take the driver down.
    let work = Arc::clone(work);
    let result = tokio::spawn(async move { work.reconcile().await }).await;

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(task = %shared.name, error = %e, "Reconciliation failed"),
        Err(e) => error!(task = %shared.name, error = %e, "Reconciliation task panicked"),
    }

    shared.completed_runs.fetch_add(1, Ordering::AcqRel);
}

/// Default delay between a change notification and the pass it triggers.
pub const DEFAULT_UPDATE_DELAY: Duration = Duration::from_millis(250);

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    /// Records when each run started and how many overlapped.
    struct Recorder {
        run_for: Duration,
        fail: bool,
        started: Mutex<Vec<Instant>>,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl Recorder {
        fn new(run_for: Duration) -> Arc<Self> {
            Arc::new(Self {
                run_for,
                fail: false,
                started: Mutex::new(Vec::new()),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                run_for: Duration::ZERO,
                fail: true,
                started: Mutex::new(Vec::new()),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            })
        }

        fn runs(&self) -> usize {
            self.started.lock().len()
        }
    }

    #[async_trait]
    impl Reconcile for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn reconcile(&self) -> Result<(), ReconcileError> {
            self.started.lock().push(Instant::now());
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            tokio::time::sleep(self.run_for).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                return Err(ReconcileError::Internal("boom".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_to_one_trailing_run() {
        let work = Recorder::new(Duration::ZERO);
        let (_tx, rx) = watch::channel(false);
        let (task, _handle) = SingletonTask::spawn(work.clone(), Duration::from_millis(250), rx);

        let mut last = Instant::now();
        for _ in 0..5 {
            task.reschedule();
            last = Instant::now();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        tokio::time::sleep(Duration::from_secs(1)).await;

        let started = work.started.lock().clone();
        assert_eq!(started.len(), 1);
        assert!(started[0] >= last + Duration::from_millis(250));
        assert_eq!(task.completed_runs(), 1);
        assert_eq!(task.phase(), TaskPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_during_run_queues_exactly_one_more() {
        let work = Recorder::new(Duration::from_millis(100));
        let (_tx, rx) = watch::channel(false);
        let (task, _handle) = SingletonTask::spawn(work.clone(), Duration::from_millis(50), rx);

        task.reschedule();
        // Run starts at 50ms and lasts until 150ms.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(task.phase().is_running());

        task.reschedule();
        task.reschedule();
        task.reschedule();
        assert!(matches!(
            task.phase(),
            TaskPhase::RunningWithPending { .. }
        ));

        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(work.runs(), 2);
        assert_eq!(work.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_run_does_not_stop_task() {
        let work = Recorder::failing();
        let (_tx, rx) = watch::channel(false);
        let (task, _handle) = SingletonTask::spawn(work.clone(), Duration::from_millis(10), rx);

        task.reschedule();
        tokio::time::sleep(Duration::from_millis(100)).await;
        task.reschedule();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(work.runs(), 2);
        assert_eq!(task.completed_runs(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_suppresses_pending_run() {
        let work = Recorder::new(Duration::ZERO);
        let (tx, rx) = watch::channel(false);
        let (task, handle) = SingletonTask::spawn(work.clone(), Duration::from_millis(250), rx);

        task.reschedule();
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        task.reschedule();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(work.runs(), 0);
        assert!(task.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_lets_active_run_finish() {
        let work = Recorder::new(Duration::from_millis(200));
        let (tx, rx) = watch::channel(false);
        let (task, handle) = SingletonTask::spawn(work.clone(), Duration::from_millis(10), rx);

        task.reschedule();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(task.phase().is_running());

        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(work.runs(), 1);
        assert_eq!(task.completed_runs(), 1);
        assert_eq!(work.active.load(Ordering::SeqCst), 0);
    }
}
