use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::RunConfig;
use crate::credentials::{Credential, CredentialPool};
use crate::error::{QueueError, Result};
use crate::history::BatchSink;
use crate::scheduler::job::{GenerationMode, Job, JobId};
use crate::scheduler::publisher::SnapshotPublisher;
use crate::scheduler::queue::JobQueue;
use crate::scheduler::run::{RunContext, RunEvent, RunPhase, RunReport};
use crate::scheduler::store::JobStore;
use crate::worker::{Generator, Worker};

const EVENT_CAPACITY: usize = 1024;

/// Owns the job store and drives runs over it.
///
/// One run at a time: [`start`](Self::start) seeds a fresh queue and key
/// pool, spawns the workers, and returns a [`RunHandle`]. Observers follow
/// progress through [`JobStore::subscribe`], [`subscribe_events`](Self::subscribe_events)
/// and [`subscribe_phase`](Self::subscribe_phase).
pub struct Scheduler {
    store: JobStore,
    generator: Arc<dyn Generator>,
    config: RunConfig,
    history: Option<Arc<dyn BatchSink>>,
    phase: Arc<watch::Sender<RunPhase>>,
    events: broadcast::Sender<RunEvent>,
    current: Mutex<Option<CancellationToken>>,
}

/// Handle to a started run.
pub struct RunHandle {
    run_id: Uuid,
    workers: usize,
    cancel: CancellationToken,
    task: JoinHandle<RunReport>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Number of workers the run spawned.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Ask the run to stop. In-flight calls finish; nothing new is dequeued.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the run to reach its terminal state.
    pub async fn wait(self) -> Result<RunReport> {
        self.task
            .await
            .map_err(|e| QueueError::Internal(format!("run task failed: {e}")))
    }
}

impl Scheduler {
    pub fn new(generator: Arc<dyn Generator>, config: RunConfig) -> Self {
        let (phase_tx, _phase_rx) = watch::channel(RunPhase::Idle);
        let (events, _events_rx) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store: JobStore::new(),
            generator,
            config,
            history: None,
            phase: Arc::new(phase_tx),
            events,
            current: Mutex::new(None),
        }
    }

    /// Save idea and prompt batches to `sink` when their runs drain.
    pub fn with_history(mut self, sink: Arc<dyn BatchSink>) -> Self {
        self.history = Some(sink);
        self
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.phase() != RunPhase::Idle
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<RunPhase> {
        self.phase.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    pub async fn add_jobs(&self, jobs: impl IntoIterator<Item = Job>) -> Vec<JobId> {
        self.store.add_jobs(jobs).await
    }

    /// Remove a job. Rejected while the job is processing.
    pub async fn delete_job(&self, id: &JobId) -> Result<Job> {
        let job = self.store.delete(id).await?;
        tracing::info!(job_id = %id, label = %job.label, "Job deleted");
        Ok(job)
    }

    /// Reset a finished job so the next run processes it again.
    pub async fn retry_job(&self, id: &JobId) -> Result<()> {
        self.store.retry(id).await?;
        tracing::info!(job_id = %id, "Job reset for retry");
        Ok(())
    }

    /// Drop every job. Not allowed while a run is active.
    pub async fn clear(&self) -> Result<usize> {
        if self.is_running() {
            return Err(QueueError::AlreadyRunning);
        }
        let removed = self.store.clear().await;
        tracing::info!(removed, "Cleared all jobs");
        Ok(removed)
    }

    /// Stop the active run, if any.
    pub async fn stop(&self) {
        if let Some(token) = self.current.lock().await.as_ref() {
            token.cancel();
        }
    }

    /// Start processing the store's pending and failed jobs with `credentials`.
    ///
    /// Fails without touching any job when no key is given, when the store
    /// is empty, or when a run is already active.
    pub async fn start(
        &self,
        mode: GenerationMode,
        credentials: Vec<Credential>,
    ) -> Result<RunHandle> {
        if credentials.is_empty() {
            return Err(QueueError::NoCredentials);
        }

        let claimed = self.phase.send_if_modified(|phase| {
            if *phase == RunPhase::Idle {
                *phase = RunPhase::Running;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(QueueError::AlreadyRunning);
        }

        let targets = match self.store.prepare_run().await {
            Ok(targets) => targets,
            Err(e) => {
                self.phase.send_replace(RunPhase::Idle);
                return Err(e);
            }
        };

        let key_count = credentials.len();
        let workers = self.config.effective_concurrency(key_count);
        let queued = targets.len();

        let ctx = Arc::new(RunContext::new(
            mode,
            self.config.clone(),
            self.store.clone(),
            self.generator.clone(),
            targets.into_iter().collect::<JobQueue>(),
            CredentialPool::new(credentials),
            self.events.clone(),
            self.phase.clone(),
        ));
        let run_id = ctx.run_id();
        let cancel = ctx.cancel.clone();
        *self.current.lock().await = Some(cancel.clone());

        tracing::info!(
            run_id = %run_id,
            mode = %mode,
            queued,
            keys = key_count,
            workers,
            "Starting queue, spawning {} workers",
            workers
        );
        ctx.emit(RunEvent::Started {
            run_id,
            mode,
            queued,
            workers,
        });

        let history = self.history.clone();
        let task = tokio::spawn(drive(ctx, workers, history));

        Ok(RunHandle {
            run_id,
            workers,
            cancel,
            task,
        })
    }
}

/// Run the worker group to exhaustion and settle the terminal state.
async fn drive(
    ctx: Arc<RunContext>,
    workers: usize,
    history: Option<Arc<dyn BatchSink>>,
) -> RunReport {
    let started = Instant::now();

    let publisher_stop = CancellationToken::new();
    let publisher = {
        let store = ctx.store.clone();
        let stop = publisher_stop.clone();
        let publisher = SnapshotPublisher::new(ctx.config.publish_interval());
        tokio::spawn(async move { publisher.run(store, stop).await })
    };

    loop {
        let mut group = JoinSet::new();
        for worker_id in 1..=workers {
            ctx.worker_started();
            group.spawn(Worker::new(worker_id, ctx.clone()).run());
        }

        while let Some(joined) = group.join_next().await {
            ctx.worker_exited();
            if let Err(e) = joined {
                tracing::error!(run_id = %ctx.run_id, error = %e, "Worker task failed");
            }
        }

        tokio::time::sleep(ctx.config.settle_delay()).await;

        let queued = ctx.queued().await;
        if ctx.is_cancelled() || queued == 0 {
            break;
        }
        tracing::warn!(run_id = %ctx.run_id, queued, "Jobs re-entered the queue, resuming");
        ctx.phase.send_replace(RunPhase::Running);
    }

    publisher_stop.cancel();
    if let Err(e) = publisher.await {
        tracing::error!(run_id = %ctx.run_id, error = %e, "Snapshot publisher failed");
    }

    let snapshot = ctx.store.snapshot().await;
    let counts = ctx.store.counts().await;
    let cancelled = ctx.is_cancelled();

    if !cancelled && ctx.mode.keeps_history() {
        if let Some(sink) = history {
            if let Err(e) = sink.save(ctx.mode, &snapshot).await {
                tracing::error!(run_id = %ctx.run_id, error = %e, "Failed to save batch history");
            }
        }
    }

    let report = RunReport {
        run_id: ctx.run_id,
        mode: ctx.mode,
        workers,
        counts,
        cancelled,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };

    ctx.phase.send_replace(RunPhase::Idle);
    if cancelled {
        tracing::info!(run_id = %ctx.run_id, pending = counts.pending, "Run stopped");
    } else {
        tracing::info!(
            run_id = %ctx.run_id,
            completed = counts.completed,
            failed = counts.failed,
            "All workers finished"
        );
    }
    ctx.emit(RunEvent::Finished(report.clone()));

    report
}
