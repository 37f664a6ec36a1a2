use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::RunConfig;
use crate::credentials::CredentialPool;
use crate::scheduler::job::{GenerationMode, JobId};
use crate::scheduler::queue::JobQueue;
use crate::scheduler::store::{JobStore, StatusCounts};
use crate::worker::Generator;

/// Lifecycle of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    /// No run active.
    Idle,
    /// Jobs are queued or being processed.
    Running,
    /// Queue drained, waiting for in-flight calls.
    Draining,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::Idle => write!(f, "idle"),
            RunPhase::Running => write!(f, "running"),
            RunPhase::Draining => write!(f, "draining"),
        }
    }
}

/// Final accounting of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub mode: GenerationMode,
    pub workers: usize,
    pub counts: StatusCounts,
    /// The run was stopped before its queue drained.
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

/// Activity notifications, one per notable step of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Started {
        run_id: Uuid,
        mode: GenerationMode,
        queued: usize,
        workers: usize,
    },
    JobSucceeded {
        job_id: JobId,
        key_number: usize,
    },
    KeyCoolingDown {
        job_id: JobId,
        key_number: usize,
        cooldown_ms: u64,
    },
    JobFailed {
        job_id: JobId,
        key_number: usize,
        error: String,
    },
    Finished(RunReport),
}

/// Mutable per-run state. Only touched while holding the context lock and
/// never across a generator call.
#[derive(Debug)]
pub(crate) struct RunState {
    pub(crate) queue: JobQueue,
    pub(crate) pool: CredentialPool,
}

/// Everything one run needs, shared by its controller and workers.
///
/// Each run builds a fresh context, so nothing leaks between runs.
pub struct RunContext {
    pub(crate) run_id: Uuid,
    pub(crate) mode: GenerationMode,
    pub(crate) config: RunConfig,
    pub(crate) store: JobStore,
    pub(crate) generator: Arc<dyn Generator>,
    pub(crate) cancel: CancellationToken,
    pub(crate) events: broadcast::Sender<RunEvent>,
    pub(crate) phase: Arc<watch::Sender<RunPhase>>,
    pub(crate) state: Mutex<RunState>,
    active_workers: AtomicUsize,
}

impl RunContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        mode: GenerationMode,
        config: RunConfig,
        store: JobStore,
        generator: Arc<dyn Generator>,
        queue: JobQueue,
        pool: CredentialPool,
        events: broadcast::Sender<RunEvent>,
        phase: Arc<watch::Sender<RunPhase>>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            mode,
            config,
            store,
            generator,
            cancel: CancellationToken::new(),
            events,
            phase,
            state: Mutex::new(RunState { queue, pool }),
            active_workers: AtomicUsize::new(0),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Workers spawned and not yet exited.
    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    pub async fn queued(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub(crate) fn worker_started(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn worker_exited(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn emit(&self, event: RunEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Draining -> Running, when a job re-enters the queue.
    pub(crate) fn resume_running(&self) {
        self.phase.send_if_modified(|phase| {
            if *phase == RunPhase::Draining {
                *phase = RunPhase::Running;
                true
            } else {
                false
            }
        });
    }

    /// Running -> Draining, once the first worker finds the queue empty.
    pub(crate) fn enter_draining(&self) {
        self.phase.send_if_modified(|phase| {
            if *phase == RunPhase::Running {
                *phase = RunPhase::Draining;
                true
            } else {
                false
            }
        });
    }
}
